//! In-memory coverage object model.
//!
//! The scope hierarchy is an arena: every [`ScopeNode`] lives in
//! `CoverageDb::scopes` and is addressed by a [`ScopeId`]. Parents hold
//! ordered child id lists; the parent link is a plain index.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::{NcdbError, NcdbResult};

pub type ScopeId = usize;

pub const TOGGLE_BIN_0_TO_1: &str = "0 -> 1";
pub const TOGGLE_BIN_1_TO_0: &str = "1 -> 0";

// ---------------------------------------------------------------------------
// Enumerations with stable wire codes
// ---------------------------------------------------------------------------

macro_rules! code_enum {
    ($(#[$meta:meta])* $name:ident, $label:literal { $($variant:ident = $code:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const fn code(self) -> u64 {
                match self {
                    $($name::$variant => $code),+
                }
            }

            pub fn from_code(code: u64) -> NcdbResult<Self> {
                match code {
                    $($code => Ok($name::$variant),)+
                    other => Err(NcdbError::InvalidData(format!(
                        "unknown {} code {:#x}",
                        $label, other
                    ))),
                }
            }
        }
    };
}

code_enum!(
    /// Scope kinds, coded with their UCIS bit values.
    ScopeType, "scope type" {
        Toggle = 0x1,
        Branch = 0x2,
        Expr = 0x4,
        Cond = 0x8,
        Instance = 0x10,
        Process = 0x20,
        Block = 0x40,
        Function = 0x80,
        ForkJoin = 0x100,
        Generate = 0x200,
        Generic = 0x400,
        Class = 0x800,
        Covergroup = 0x1000,
        CoverInstance = 0x2000,
        Coverpoint = 0x4000,
        Cross = 0x8000,
        Cover = 0x10000,
        Assert = 0x20000,
        Program = 0x40000,
        Package = 0x80000,
        Task = 0x100000,
        Interface = 0x200000,
        Fsm = 0x400000,
        DuModule = 0x1000000,
        DuArch = 0x2000000,
        DuPackage = 0x4000000,
        DuProgram = 0x8000000,
        DuInterface = 0x10000000,
        FsmStates = 0x20000000,
        FsmTrans = 0x40000000,
        CovBlock = 0x80000000,
        CvgBinScope = 0x100000000,
        IllegalBinScope = 0x200000000,
        IgnoreBinScope = 0x400000000,
    }
);

impl ScopeType {
    pub fn is_design_unit(self) -> bool {
        matches!(
            self,
            ScopeType::DuModule
                | ScopeType::DuArch
                | ScopeType::DuPackage
                | ScopeType::DuProgram
                | ScopeType::DuInterface
        )
    }
}

code_enum!(
    CoverType, "cover type" {
        CvgBin = 0x1,
        CoverBin = 0x2,
        AssertBin = 0x4,
        StmtBin = 0x20,
        BranchBin = 0x40,
        ExprBin = 0x80,
        CondBin = 0x100,
        ToggleBin = 0x200,
        PassBin = 0x400,
        FsmBin = 0x800,
        UserBin = 0x1000,
        Count = 0x2000,
        FailBin = 0x4000,
        VacuousBin = 0x8000,
        DisabledBin = 0x10000,
        AttemptBin = 0x20000,
        ActiveBin = 0x40000,
        IgnoreBin = 0x80000,
        IllegalBin = 0x100000,
        DefaultBin = 0x200000,
        PeakActiveBin = 0x400000,
        BlockBin = 0x1000000,
    }
);

impl CoverType {
    /// Threshold a coveritem of this type gets when none is recorded.
    pub fn default_at_least(self) -> u64 {
        match self {
            CoverType::CvgBin => 1,
            _ => 0,
        }
    }
}

code_enum!(
    /// HDL language of a scope.
    SourceType, "source type" {
        Vhdl = 0,
        Verilog = 1,
        SystemVerilog = 2,
        SystemC = 3,
        Psl = 4,
        PslVhdl = 5,
        PslVerilog = 6,
        PslSystemVerilog = 7,
        PslSystemC = 8,
        E = 9,
        None = 10,
        Other = 11,
    }
);

code_enum!(
    TestStatus, "test status" {
        Ok = 1,
        Warning = 2,
        Error = 3,
        Fatal = 4,
        Missing = 5,
        MergeError = 6,
    }
);

code_enum!(
    ToggleDir, "toggle direction" {
        Internal = 1,
        In = 2,
        Out = 3,
        InOut = 4,
    }
);

code_enum!(
    ToggleMetric, "toggle metric" {
        NoBins = 1,
        Enum = 2,
        Transition = 3,
        TwoStateToggle = 4,
        ZToggle = 5,
        XToggle = 6,
    }
);

code_enum!(
    ToggleType, "toggle type" {
        Net = 1,
        Reg = 2,
    }
);

code_enum!(
    FormalStatus, "formal status" {
        None = 0,
        Failure = 1,
        Proof = 2,
        Vacuous = 3,
        Inconclusive = 4,
        Assumption = 5,
        Conflict = 6,
    }
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HistoryKind {
    Test,
    Merge,
}

impl HistoryKind {
    pub fn code(self) -> i64 {
        match self {
            HistoryKind::Test => 1,
            HistoryKind::Merge => 2,
        }
    }

    pub fn from_code(code: i64) -> NcdbResult<Self> {
        match code {
            1 => Ok(HistoryKind::Test),
            2 => Ok(HistoryKind::Merge),
            other => Err(NcdbError::InvalidData(format!(
                "unknown history kind {other}"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HistoryKind::Test => "TEST",
            HistoryKind::Merge => "MERGE",
        }
    }
}

// ---------------------------------------------------------------------------
// Typed values
// ---------------------------------------------------------------------------

/// A string, integer or real value. Used for attributes and typed properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Real(f64),
    Str(String),
}

impl Value {
    pub fn type_tag(&self) -> &'static str {
        match self {
            Value::Str(_) => "str",
            Value::Int(_) => "int",
            Value::Real(_) => "real",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

/// Closed set of typed properties that survive a container round-trip.
/// Each key belongs to exactly one value domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    Generic,
    Comment,
    ExprTerms,
    BranchHasElse,
    BranchIsCase,
    StmtIndex,
    CvgAutoBinMax,
    CvgPerInstance,
    CvgMergeInstances,
    CvgWeight,
}

impl PropertyKey {
    pub const ALL: [PropertyKey; 10] = [
        PropertyKey::Generic,
        PropertyKey::Comment,
        PropertyKey::ExprTerms,
        PropertyKey::BranchHasElse,
        PropertyKey::BranchIsCase,
        PropertyKey::StmtIndex,
        PropertyKey::CvgAutoBinMax,
        PropertyKey::CvgPerInstance,
        PropertyKey::CvgMergeInstances,
        PropertyKey::CvgWeight,
    ];

    /// `(value domain, code within that domain)`.
    pub fn code(self) -> (&'static str, i64) {
        match self {
            PropertyKey::Generic => ("str", 10),
            PropertyKey::Comment => ("str", 12),
            PropertyKey::ExprTerms => ("str", 26),
            PropertyKey::BranchHasElse => ("int", 16),
            PropertyKey::BranchIsCase => ("int", 17),
            PropertyKey::StmtIndex => ("int", 23),
            PropertyKey::CvgAutoBinMax => ("int", 27),
            PropertyKey::CvgPerInstance => ("int", 31),
            PropertyKey::CvgMergeInstances => ("int", 33),
            PropertyKey::CvgWeight => ("real", 0),
        }
    }

    pub fn from_code(domain: &str, code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.code() == (domain, code))
    }

    pub fn accepts(self, value: &Value) -> bool {
        self.code().0 == value.type_tag()
    }
}

pub type AttrMap = IndexMap<String, Value>;
pub type PropertyMap = IndexMap<PropertyKey, Value>;

// ---------------------------------------------------------------------------
// Scope-level records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: u64,
    pub token: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleInfo {
    pub canonical: Option<String>,
    pub metric: ToggleMetric,
    pub toggle_type: ToggleType,
    pub dir: ToggleDir,
}

impl Default for ToggleInfo {
    fn default() -> Self {
        Self {
            canonical: None,
            metric: ToggleMetric::TwoStateToggle,
            toggle_type: ToggleType::Net,
            dir: ToggleDir::Internal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsmState {
    pub index: i64,
    pub visit_count: u64,
}

/// State and transition tables of an FSM scope, derived from its
/// `FsmStates`/`FsmTrans` children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FsmTables {
    pub states: IndexMap<String, FsmState>,
    pub transitions: IndexMap<(String, String), u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormalResult {
    pub status: FormalStatus,
    pub radius: u64,
    pub witness: Option<String>,
}

impl FormalResult {
    pub fn is_default(&self) -> bool {
        self.status == FormalStatus::None && self.radius == 0 && self.witness.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoverItem {
    pub name: String,
    pub cover_type: CoverType,
    pub count: u64,
    pub at_least: u64,
    pub flags: u64,
    pub attrs: AttrMap,
    pub properties: PropertyMap,
    pub formal: Option<FormalResult>,
}

impl CoverItem {
    pub fn new(name: &str, cover_type: CoverType, count: u64) -> Self {
        Self {
            name: name.to_string(),
            cover_type,
            count,
            at_least: cover_type.default_at_least(),
            flags: 0,
            attrs: AttrMap::new(),
            properties: PropertyMap::new(),
            formal: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScopeNode {
    pub name: String,
    pub scope_type: ScopeType,
    pub parent: Option<ScopeId>,
    pub children: Vec<ScopeId>,
    pub coveritems: Vec<CoverItem>,
    pub source: Option<SourceLocation>,
    pub weight: u64,
    pub goal: Option<u64>,
    pub flags: u64,
    pub source_type: SourceType,
    /// Design unit an `Instance` scope instantiates.
    pub du: Option<ScopeId>,
    /// True for placeholder scopes that are not part of the hierarchy.
    pub detached: bool,
    pub tags: Vec<String>,
    pub attrs: AttrMap,
    pub properties: PropertyMap,
    pub toggle: Option<ToggleInfo>,
    pub fsm: Option<FsmTables>,
    /// Coverpoints a `Cross` scope crosses (siblings of the cross).
    pub crossed: Vec<ScopeId>,
}

impl ScopeNode {
    fn new(name: &str, scope_type: ScopeType, parent: Option<ScopeId>) -> Self {
        Self {
            name: name.to_string(),
            scope_type,
            parent,
            children: Vec::new(),
            coveritems: Vec::new(),
            source: None,
            weight: 1,
            goal: None,
            flags: 0,
            source_type: SourceType::None,
            du: None,
            detached: false,
            tags: Vec::new(),
            attrs: AttrMap::new(),
            properties: PropertyMap::new(),
            toggle: None,
            fsm: None,
            crossed: Vec::new(),
        }
    }

    /// Branch scope holding exactly the two toggle transition bins and no children.
    pub fn is_toggle_pair(&self) -> bool {
        if self.scope_type != ScopeType::Branch
            || self.coveritems.len() != 2
            || !self.children.is_empty()
        {
            return false;
        }
        let a = self.coveritems[0].name.as_str();
        let b = self.coveritems[1].name.as_str();
        (a == TOGGLE_BIN_0_TO_1 && b == TOGGLE_BIN_1_TO_0)
            || (a == TOGGLE_BIN_1_TO_0 && b == TOGGLE_BIN_0_TO_1)
    }

    pub fn coveritem(&self, name: &str) -> Option<&CoverItem> {
        self.coveritems.iter().find(|c| c.name == name)
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

fn default_status() -> u64 {
    TestStatus::Ok.code()
}

/// One test run or merge operation, as stored in `history.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryNode {
    #[serde(default)]
    pub logical_name: String,
    #[serde(default)]
    pub physical_name: Option<String>,
    #[serde(default = "default_kind")]
    pub kind: HistoryKind,
    #[serde(default = "default_status")]
    pub test_status: u64,
    #[serde(default)]
    pub sim_time: Option<f64>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub time_unit: Option<String>,
    #[serde(default)]
    pub run_cwd: Option<String>,
    #[serde(default)]
    pub cpu_time: Option<f64>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub seed: Option<String>,
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(default)]
    pub args: Option<String>,
    #[serde(default)]
    pub compulsory: Option<bool>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub date: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub tool_category: Option<String>,
    #[serde(default)]
    pub ucis_version: Option<String>,
    #[serde(default)]
    pub vendor_id: Option<String>,
    #[serde(default)]
    pub vendor_tool: Option<String>,
    #[serde(default)]
    pub vendor_tool_version: Option<String>,
    #[serde(default)]
    pub same_tests: Option<u64>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(skip)]
    pub attrs: AttrMap,
}

fn default_kind() -> HistoryKind {
    HistoryKind::Test
}

impl HistoryNode {
    pub fn new(logical_name: &str, kind: HistoryKind) -> Self {
        Self {
            logical_name: logical_name.to_string(),
            physical_name: None,
            kind,
            test_status: TestStatus::Ok.code(),
            sim_time: None,
            time_unit: None,
            run_cwd: None,
            cpu_time: None,
            seed: None,
            cmd: None,
            args: None,
            compulsory: None,
            date: None,
            user_name: None,
            cost: None,
            tool_category: None,
            ucis_version: None,
            vendor_id: None,
            vendor_tool: None,
            vendor_tool_version: None,
            same_tests: None,
            comment: None,
            attrs: AttrMap::new(),
        }
    }

    pub fn test(logical_name: &str) -> Self {
        Self::new(logical_name, HistoryKind::Test)
    }

    pub fn status(&self) -> NcdbResult<TestStatus> {
        TestStatus::from_code(self.test_status)
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// Per-test contributions: history index -> (flat coveritem index -> count).
pub type Contributions = BTreeMap<usize, BTreeMap<usize, u64>>;

#[derive(Debug, Clone, PartialEq)]
pub struct CoverageDb {
    pub scopes: Vec<ScopeNode>,
    pub roots: Vec<ScopeId>,
    pub history: Vec<HistoryNode>,
    pub path_separator: String,
    pub ucis_version: String,
    pub attrs: AttrMap,
    pub contributions: Contributions,
    /// Design-unit lookup populated from `design_units.json` on read.
    pub du_index: Option<IndexMap<String, ScopeId>>,
}

impl Default for CoverageDb {
    fn default() -> Self {
        Self::new()
    }
}

impl CoverageDb {
    pub fn new() -> Self {
        Self {
            scopes: Vec::new(),
            roots: Vec::new(),
            history: Vec::new(),
            path_separator: "/".to_string(),
            ucis_version: "1.0".to_string(),
            attrs: AttrMap::new(),
            contributions: Contributions::new(),
            du_index: None,
        }
    }

    pub fn scope(&self, id: ScopeId) -> &ScopeNode {
        &self.scopes[id]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut ScopeNode {
        &mut self.scopes[id]
    }

    /// Children of `parent`, or the top-level scopes for `None`.
    pub fn children(&self, parent: Option<ScopeId>) -> &[ScopeId] {
        match parent {
            Some(id) => &self.scopes[id].children,
            None => &self.roots,
        }
    }

    pub fn create_scope(
        &mut self,
        parent: Option<ScopeId>,
        name: &str,
        scope_type: ScopeType,
    ) -> ScopeId {
        let id = self.scopes.len();
        self.scopes.push(ScopeNode::new(name, scope_type, parent));
        match parent {
            Some(p) => self.scopes[p].children.push(id),
            None => self.roots.push(id),
        }
        id
    }

    pub fn create_instance(
        &mut self,
        parent: Option<ScopeId>,
        name: &str,
        du: ScopeId,
    ) -> ScopeId {
        let id = self.create_scope(parent, name, ScopeType::Instance);
        self.scopes[id].du = Some(du);
        id
    }

    /// Arena-resident scope that is not attached to any parent.
    pub fn create_detached(&mut self, name: &str, scope_type: ScopeType) -> ScopeId {
        let id = self.scopes.len();
        let mut node = ScopeNode::new(name, scope_type, None);
        node.detached = true;
        self.scopes.push(node);
        id
    }

    /// Append a coveritem to `scope`; returns its position.
    pub fn create_next_cover(
        &mut self,
        scope: ScopeId,
        name: &str,
        cover_type: CoverType,
        count: u64,
    ) -> usize {
        let items = &mut self.scopes[scope].coveritems;
        items.push(CoverItem::new(name, cover_type, count));
        items.len() - 1
    }

    /// Branch scope carrying a `0 -> 1` / `1 -> 0` toggle pair.
    pub fn create_toggle_pair(
        &mut self,
        parent: Option<ScopeId>,
        name: &str,
        rise: u64,
        fall: u64,
    ) -> ScopeId {
        let id = self.create_scope(parent, name, ScopeType::Branch);
        self.create_next_cover(id, TOGGLE_BIN_0_TO_1, CoverType::ToggleBin, rise);
        self.create_next_cover(id, TOGGLE_BIN_1_TO_0, CoverType::ToggleBin, fall);
        id
    }

    pub fn find_child(
        &self,
        parent: Option<ScopeId>,
        name: &str,
        scope_type: ScopeType,
    ) -> Option<ScopeId> {
        self.children(parent).iter().copied().find(|&c| {
            let node = &self.scopes[c];
            node.name == name && node.scope_type == scope_type
        })
    }

    pub fn add_history(&mut self, node: HistoryNode) -> usize {
        self.history.push(node);
        self.history.len() - 1
    }

    pub fn history_of_kind(&self, kind: HistoryKind) -> impl Iterator<Item = (usize, &HistoryNode)> {
        self.history
            .iter()
            .enumerate()
            .filter(move |(_, h)| h.kind == kind)
    }

    pub fn test_count(&self) -> usize {
        self.history_of_kind(HistoryKind::Test).count()
    }

    /// Record that history node `history_idx` hit flat coveritem `bin` `count` times.
    pub fn record_contribution(&mut self, history_idx: usize, bin: usize, count: u64) {
        *self
            .contributions
            .entry(history_idx)
            .or_default()
            .entry(bin)
            .or_insert(0) += count;
    }

    /// Look up a design unit by name; uses the stored index when present.
    pub fn design_unit(&self, name: &str) -> Option<ScopeId> {
        if let Some(index) = &self.du_index {
            return index.get(name).copied();
        }
        crate::codec::dfs::dfs_scopes(self)
            .into_iter()
            .find(|&id| {
                let node = &self.scopes[id];
                node.scope_type.is_design_unit() && node.name == name
            })
    }

    /// Name path from the root to `id`, joined by `path_separator`.
    pub fn path_of(&self, id: ScopeId) -> String {
        let mut parts = Vec::new();
        let mut cur = Some(id);
        while let Some(c) = cur {
            parts.push(self.scopes[c].name.as_str());
            cur = self.scopes[c].parent;
        }
        parts.reverse();
        parts.join(&self.path_separator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip() {
        for st in [ScopeType::Toggle, ScopeType::Fsm, ScopeType::IgnoreBinScope] {
            assert_eq!(ScopeType::from_code(st.code()).unwrap(), st);
        }
        assert_eq!(CoverType::from_code(0x200).unwrap(), CoverType::ToggleBin);
        assert_eq!(SourceType::None.code(), 10);
    }

    #[test]
    fn test_unknown_code_is_invalid_data() {
        assert!(matches!(
            ScopeType::from_code(0x3),
            Err(NcdbError::InvalidData(_))
        ));
        assert!(matches!(
            CoverType::from_code(0x8),
            Err(NcdbError::InvalidData(_))
        ));
    }

    #[test]
    fn test_default_at_least() {
        assert_eq!(CoverType::CvgBin.default_at_least(), 1);
        assert_eq!(CoverType::ToggleBin.default_at_least(), 0);
        let item = CoverItem::new("b", CoverType::CvgBin, 3);
        assert_eq!(item.at_least, 1);
    }

    #[test]
    fn test_toggle_pair_detection() {
        let mut db = CoverageDb::new();
        let sig = db.create_scope(None, "sig", ScopeType::Toggle);
        let pair = db.create_toggle_pair(Some(sig), "bit0", 3, 4);
        assert!(db.scope(pair).is_toggle_pair());
        assert!(!db.scope(sig).is_toggle_pair());

        let branch = db.create_scope(None, "if_1", ScopeType::Branch);
        db.create_next_cover(branch, "true", CoverType::BranchBin, 1);
        db.create_next_cover(branch, "false", CoverType::BranchBin, 0);
        assert!(!db.scope(branch).is_toggle_pair());
    }

    #[test]
    fn test_detached_scope_not_attached() {
        let mut db = CoverageDb::new();
        let top = db.create_scope(None, "top", ScopeType::Instance);
        let du = db.create_detached("work.top", ScopeType::DuModule);
        assert!(db.scope(du).detached);
        assert_eq!(db.roots, vec![top]);
    }

    #[test]
    fn test_property_key_domains() {
        assert!(PropertyKey::Comment.accepts(&Value::from("x")));
        assert!(!PropertyKey::Comment.accepts(&Value::Int(1)));
        assert_eq!(PropertyKey::from_code("int", 16), Some(PropertyKey::BranchHasElse));
        assert_eq!(PropertyKey::from_code("str", 16), None);
    }

    #[test]
    fn test_history_json_tolerates_numeric_date() {
        let node: HistoryNode = serde_json::from_str(
            r#"{"logical_name":"t1","kind":"MERGE","date":1700000000,"seed":42}"#,
        )
        .unwrap();
        assert_eq!(node.kind, HistoryKind::Merge);
        assert_eq!(node.date.as_deref(), Some("1700000000"));
        assert_eq!(node.seed.as_deref(), Some("42"));
        assert_eq!(node.status().unwrap(), TestStatus::Ok);
    }

    #[test]
    fn test_value_untagged_json() {
        let v: Vec<Value> = serde_json::from_str(r#"[1, 2.5, "s"]"#).unwrap();
        assert_eq!(v, vec![Value::Int(1), Value::Real(2.5), Value::from("s")]);
    }

    #[test]
    fn test_path_of() {
        let mut db = CoverageDb::new();
        let a = db.create_scope(None, "top", ScopeType::Instance);
        let b = db.create_scope(Some(a), "cg", ScopeType::Covergroup);
        assert_eq!(db.path_of(b), "top/cg");
    }
}
