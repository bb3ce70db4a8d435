//! Rule-set model: navigation specifications, grouping and sorting rules,
//! instance-label overrides and the supported-schema configuration surface.
//!
//! All types are plain data with serde support so rule sets can be declared
//! in YAML or JSON files (see [`config`]).

use serde::{Deserialize, Serialize};

pub mod config;
pub mod errors;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelDirection {
    Forward,
    Backward,
    Either,
}

impl RelDirection {
    pub fn reverse(self) -> Self {
        match self {
            RelDirection::Forward => RelDirection::Backward,
            RelDirection::Backward => RelDirection::Forward,
            RelDirection::Either => RelDirection::Either,
        }
    }
}

impl Default for RelDirection {
    fn default() -> Self {
        RelDirection::Forward
    }
}

/// Rule-authored hint about whether produced nodes have children, carried
/// through to node materialization untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChildrenHint {
    Unknown,
    Always,
    Never,
}

impl Default for ChildrenHint {
    fn default() -> Self {
        ChildrenHint::Unknown
    }
}

/// Flags shared by every navigation specification kind.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpecificationFlags {
    pub hide_nodes_in_hierarchy: bool,
    pub hide_if_no_children: bool,
    pub hide_if_only_one_child: bool,
    pub hide_expression: Option<String>,
    pub do_not_sort: bool,
    pub group_by_class: bool,
    pub group_by_label: bool,
    pub has_children: ChildrenHint,
}

/// A polymorphic-or-not reference to a named class, with optional derived
/// class branches to exclude. Exclusions are only meaningful when the base
/// selection is polymorphic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSelector {
    pub class: String,
    #[serde(default = "default_true")]
    pub polymorphic: bool,
    #[serde(default)]
    pub excluded: Vec<ClassSelector>,
}

impl ClassSelector {
    pub fn new(class: &str) -> Self {
        ClassSelector {
            class: class.to_string(),
            polymorphic: true,
            excluded: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Exact-or-polymorphic class condition used by customization rules
/// (grouping, sorting, label overrides).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassMatch {
    pub class: String,
    #[serde(default)]
    pub polymorphic: bool,
}

/// One hop of a relationship-path specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathStepSpec {
    pub relationship: String,
    #[serde(default)]
    pub direction: RelDirection,
    #[serde(default)]
    pub target_class: Option<ClassSelector>,
}

/// Declares a joined related instance reachable from filter expressions
/// under `alias`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedAliasSpec {
    pub alias: String,
    pub relationship: String,
    #[serde(default)]
    pub direction: RelDirection,
    #[serde(default)]
    pub target_class: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllInstancesSpec {
    /// Overrides the rule set's supported-schema list when present, using
    /// the same string form (`"A,B"` allow, `"E:A,B"` deny).
    #[serde(default)]
    pub supported_schemas: Option<String>,
    #[serde(flatten)]
    pub flags: SpecificationFlags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassInstancesSpec {
    pub classes: Vec<ClassSelector>,
    #[serde(default)]
    pub instance_filter: Option<String>,
    #[serde(default)]
    pub related_aliases: Vec<RelatedAliasSpec>,
    #[serde(flatten)]
    pub flags: SpecificationFlags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedInstancesSpec {
    /// Explicit relationship path; empty when `skip_related_level` or the
    /// any-relationship form is wanted.
    #[serde(default)]
    pub path: Vec<PathStepSpec>,
    /// Walk this many related levels away before selecting, keeping the
    /// parent instance binding.
    #[serde(default)]
    pub skip_related_level: usize,
    #[serde(default)]
    pub direction: RelDirection,
    #[serde(default)]
    pub instance_filter: Option<String>,
    #[serde(default)]
    pub related_aliases: Vec<RelatedAliasSpec>,
    #[serde(default)]
    pub supported_schemas: Option<String>,
    #[serde(flatten)]
    pub flags: SpecificationFlags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQueryDef {
    /// Class whose instances the external query returns.
    pub class: String,
    pub query: String,
    #[serde(default)]
    pub parameters: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchSpec {
    pub queries: Vec<SearchQueryDef>,
    #[serde(flatten)]
    pub flags: SpecificationFlags,
}

/// Closed union over specification kinds. The orchestrator dispatches on
/// this; there is no open visitor hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Specification {
    AllInstances(AllInstancesSpec),
    InstancesOfClasses(ClassInstancesSpec),
    RelatedInstances(RelatedInstancesSpec),
    Search(SearchSpec),
}

impl Specification {
    pub fn flags(&self) -> &SpecificationFlags {
        match self {
            Specification::AllInstances(spec) => &spec.flags,
            Specification::InstancesOfClasses(spec) => &spec.flags,
            Specification::RelatedInstances(spec) => &spec.flags,
            Specification::Search(spec) => &spec.flags,
        }
    }

    /// Stable hash of the specification definition, used by the node cache
    /// to resume grouping state at a tree position.
    pub fn hash(&self) -> String {
        // serde_json output is deterministic for our types (no maps).
        let json = serde_json::to_string(self).unwrap_or_default();
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in json.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x100000001b3);
        }
        format!("{hash:016x}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationRule {
    #[serde(default)]
    pub priority: i32,
    pub specifications: Vec<Specification>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassGroupSpec {
    /// Groups by direct subclasses of this base when the selection spans
    /// several concrete classes under it; groups by concrete class otherwise.
    #[serde(default)]
    pub base_class: Option<String>,
    #[serde(default)]
    pub create_for_single_item: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GroupValueKind {
    RawValue,
    DisplayLabel,
}

impl Default for GroupValueKind {
    fn default() -> Self {
        GroupValueKind::RawValue
    }
}

/// An inclusive numeric range. Declaration order decides precedence: the
/// first range containing a value wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyRange {
    pub from: f64,
    pub to: f64,
    #[serde(default)]
    pub label: Option<String>,
}

impl PropertyRange {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.from && value <= self.to
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyGroupSpec {
    pub property: String,
    #[serde(default)]
    pub ranges: Vec<PropertyRange>,
    #[serde(default)]
    pub grouping_value: GroupValueKind,
    #[serde(default)]
    pub sorting_value: GroupValueKind,
    #[serde(default)]
    pub create_for_single_item: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum GroupSpec {
    ByClass(ClassGroupSpec),
    ByProperty(PropertyGroupSpec),
    SameLabelInstance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupingRule {
    pub class: ClassMatch,
    #[serde(default)]
    pub priority: i32,
    pub groups: Vec<GroupSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SortKind {
    ByProperty {
        property: String,
        #[serde(default = "default_true")]
        ascending: bool,
    },
    DoNotSort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortingRule {
    pub class: ClassMatch,
    #[serde(default)]
    pub priority: i32,
    #[serde(flatten)]
    pub sort: SortKind,
}

/// Maps a class to an ordered property list used to compute display labels.
/// Higher priority wins; ties break by declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelOverride {
    pub class: ClassMatch,
    #[serde(default)]
    pub priority: i32,
    pub properties: Vec<String>,
}

/// Schema allow/deny list. The caller's own target schema is always
/// implicitly allowed, even when a deny list would exclude it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SupportedSchemas {
    All,
    Only(Vec<String>),
    Except(Vec<String>),
}

impl Default for SupportedSchemas {
    fn default() -> Self {
        SupportedSchemas::All
    }
}

impl SupportedSchemas {
    /// Parses the rule-authored string form: empty → all schemas,
    /// `"A,B"` → only those, `"E:A,B"` → all except those.
    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return SupportedSchemas::All;
        }
        let (exclude, list) = match trimmed.strip_prefix("E:") {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let names: Vec<String> = list
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if exclude {
            SupportedSchemas::Except(names)
        } else {
            SupportedSchemas::Only(names)
        }
    }

    pub fn allows(&self, schema: &str, target_schema: &str) -> bool {
        if schema == target_schema {
            return true;
        }
        match self {
            SupportedSchemas::All => true,
            SupportedSchemas::Only(names) => names.iter().any(|n| n == schema),
            SupportedSchemas::Except(names) => !names.iter().any(|n| n == schema),
        }
    }
}

impl From<String> for SupportedSchemas {
    fn from(value: String) -> Self {
        SupportedSchemas::parse(&value)
    }
}

impl From<SupportedSchemas> for String {
    fn from(value: SupportedSchemas) -> Self {
        match value {
            SupportedSchemas::All => String::new(),
            SupportedSchemas::Only(names) => names.join(","),
            SupportedSchemas::Except(names) => format!("E:{}", names.join(",")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleSet {
    pub id: String,
    pub supported_schemas: SupportedSchemas,
    /// Rule set wide default for specifications that don't say otherwise.
    pub default_do_not_sort: bool,
    pub root_rules: Vec<NavigationRule>,
    pub child_rules: Vec<NavigationRule>,
    pub grouping_rules: Vec<GroupingRule>,
    pub sorting_rules: Vec<SortingRule>,
    pub label_overrides: Vec<LabelOverride>,
}

impl RuleSet {
    pub fn new(id: &str) -> Self {
        RuleSet {
            id: id.to_string(),
            ..RuleSet::default()
        }
    }

    /// Grouping rules sorted by descending priority. The sort is stable, so
    /// equal priorities keep declaration order; that ordering is the
    /// documented tie-break.
    pub fn grouping_rules_by_priority(&self) -> Vec<&GroupingRule> {
        let mut rules: Vec<&GroupingRule> = self.grouping_rules.iter().collect();
        rules.sort_by_key(|r| std::cmp::Reverse(r.priority));
        rules
    }

    pub fn sorting_rules_by_priority(&self) -> Vec<&SortingRule> {
        let mut rules: Vec<&SortingRule> = self.sorting_rules.iter().collect();
        rules.sort_by_key(|r| std::cmp::Reverse(r.priority));
        rules
    }

    pub fn label_overrides_by_priority(&self) -> Vec<&LabelOverride> {
        let mut overrides: Vec<&LabelOverride> = self.label_overrides.iter().collect();
        overrides.sort_by_key(|o| std::cmp::Reverse(o.priority));
        overrides
    }
}
