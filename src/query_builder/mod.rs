//! The query builder: turns (parent node, rule, specification) into an
//! ordered sequence of executable query trees.
//!
//! Dispatch is a single match over the specification kind; every variant
//! resolves to the same intermediate form (class set, path, filters) and
//! flows through one pipeline: base selection, filter compilation, label
//! resolution, grouping, sorting, then union merging of contract-compatible
//! branches.

use std::collections::HashMap;

pub mod class_set;
pub mod context;
pub mod errors;
pub mod grouping;
pub mod labels;
pub mod path_resolver;
pub mod sorting;

#[cfg(test)]
mod tests;

use crate::filter_expr::compiler::{compile_filter, CompileEnv, RelatedTarget};
use crate::filter_expr::FilterExpressionCache;
use crate::hierarchy::{CachedNode, NodeId, NodeKey};
use crate::query_ast::sql_expr::{BoundQuery, ParamValue, SqlExpr};
use crate::query_ast::{
    ClassSelect, JoinClause, JoinKind, NodeHints, QueryTree, ResultMetadata, RowContract,
    SelectQuery, SelectSource, FIELD_CLASS_ID, FIELD_DISPLAY_LABEL, FIELD_GROUPING_VALUE,
    FIELD_INSTANCE_ID,
};
use crate::rules::{
    NavigationRule, RelDirection, RelatedAliasSpec, Specification, SpecificationFlags,
    SupportedSchemas,
};

use class_set::{resolve_all_instances, resolve_selector, ResolvedClass};
pub use context::{AliasAllocator, CancellationToken, ResolutionContext, UsedClassesListener};
use errors::QueryBuilderError;
use path_resolver::{attach_path, resolve_path_branches, resolve_skip_levels, PathBranch};
use sorting::SortDecision;

/// Everything needed to construct a branch's base instance selection. The
/// grouping engine asks for it with the contract the next layer requires.
pub(crate) struct BranchParts {
    pub alias: String,
    pub class: ResolvedClass,
    pub label: SqlExpr,
    pub source: BranchSource,
    pub path: Option<PathAttachment>,
    pub related_joins: Vec<JoinClause>,
    pub extra_filters: Vec<SqlExpr>,
    pub metadata: ResultMetadata,
}

pub(crate) enum BranchSource {
    Class,
    Raw {
        sql: String,
        params: Vec<ParamValue>,
    },
}

pub(crate) struct PathAttachment {
    pub branch: PathBranch,
    pub parent_query: BoundQuery,
}

impl BranchParts {
    pub(crate) fn instance_select(
        &self,
        contract: RowContract,
        grouping_value: Option<SqlExpr>,
    ) -> SelectQuery {
        let source = match &self.source {
            BranchSource::Class => SelectSource::Class(ClassSelect {
                class: self.class.descriptor.id,
                qualified_name: self.class.descriptor.qualified_name(),
                alias: self.alias.clone(),
                polymorphic: self.class.polymorphic,
                excluded_class_ids: self.class.excluded_ids.clone(),
            }),
            BranchSource::Raw { sql, params } => SelectSource::Raw {
                sql: sql.clone(),
                params: params.clone(),
                alias: self.alias.clone(),
            },
        };
        let mut select = SelectQuery::new(source, contract, self.metadata.clone());
        select.add_field(SqlExpr::property(&self.alias, FIELD_CLASS_ID), FIELD_CLASS_ID);
        select.add_field(
            SqlExpr::property(&self.alias, FIELD_INSTANCE_ID),
            FIELD_INSTANCE_ID,
        );
        select.add_field(self.label.clone(), FIELD_DISPLAY_LABEL);
        if let Some(grouping_value) = grouping_value {
            select.add_field(grouping_value, FIELD_GROUPING_VALUE);
        }
        for join in &self.related_joins {
            select.add_join(join.clone());
        }
        if !self.class.excluded_ids.is_empty() {
            select.add_filter(SqlExpr::InList {
                expr: Box::new(SqlExpr::property(&self.alias, FIELD_CLASS_ID)),
                items: self
                    .class
                    .excluded_ids
                    .iter()
                    .map(|id| ParamValue::Id(id.0))
                    .collect(),
                negated: true,
            });
        }
        if let Some(path) = &self.path {
            attach_path(&mut select, &path.branch, &self.alias, &path.parent_query);
        }
        for filter in &self.extra_filters {
            select.add_filter(filter.clone());
        }
        select
    }
}

struct BranchSeed {
    class: ResolvedClass,
    path: Option<PathBranch>,
    raw: Option<(String, Vec<ParamValue>)>,
    direction: Option<RelDirection>,
}

pub struct QueryBuilder<'a> {
    ctx: ResolutionContext<'a>,
    filter_cache: FilterExpressionCache,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(ctx: ResolutionContext<'a>) -> Self {
        QueryBuilder {
            ctx,
            filter_cache: FilterExpressionCache::new(),
        }
    }

    pub fn context(&self) -> &ResolutionContext<'a> {
        &self.ctx
    }

    /// Builds the query trees for one hierarchy level: the children of
    /// `parent`, or the root level when `parent` is None. A request whose
    /// resolved class/path set is empty yields an empty sequence, not an
    /// error.
    pub fn queries(
        &self,
        parent: Option<&NodeId>,
        _rule: &NavigationRule,
        spec: &Specification,
    ) -> Result<Vec<QueryTree>, QueryBuilderError> {
        self.ctx.check_cancelled()?;

        let parent_node = match parent {
            Some(id) => self.ctx.node_cache.node(id),
            // A root request may still resume grouping state from the
            // specification's currently active node.
            None => self
                .ctx
                .node_cache
                .active_node(&spec.hash(), 0)
                .and_then(|id| self.ctx.node_cache.node(&id)),
        };
        let instance_ancestors = self.instance_ancestors(parent_node.as_ref());

        let mut alloc = AliasAllocator::new();
        let seeds = self.resolve_seeds(spec, &instance_ancestors, &mut alloc)?;
        if seeds.is_empty() {
            log::debug!("specification resolved to an empty class/path set");
            return Ok(Vec::new());
        }

        let mut branches: Vec<SortedBranch> = Vec::new();
        for seed in seeds {
            self.ctx.check_cancelled()?;
            let branch = self.build_branch(
                seed,
                spec,
                parent_node.as_ref(),
                &instance_ancestors,
                &mut alloc,
            )?;
            branches.push(branch);
        }

        merge_branches(branches)
    }

    /// Instance-bearing nodes above (and including) the request's parent,
    /// nearest first. Grouping nodes are skipped: `parent` in a filter
    /// expression means the nearest parent *instance*.
    fn instance_ancestors(&self, parent: Option<&CachedNode>) -> Vec<CachedNode> {
        let mut chain = Vec::new();
        let mut current = parent.cloned();
        while let Some(node) = current {
            current = node
                .parent
                .as_ref()
                .and_then(|id| self.ctx.node_cache.node(id));
            if node.is_instance_bearing() {
                chain.push(node);
            }
        }
        chain
    }

    fn resolve_seeds(
        &self,
        spec: &Specification,
        instance_ancestors: &[CachedNode],
        alloc: &mut AliasAllocator,
    ) -> Result<Vec<BranchSeed>, QueryBuilderError> {
        match spec {
            Specification::AllInstances(all) => {
                let supported = self.supported_schemas(all.supported_schemas.as_deref());
                Ok(resolve_all_instances(&self.ctx, &supported)?
                    .into_iter()
                    .map(|class| BranchSeed {
                        class,
                        path: None,
                        raw: None,
                        direction: None,
                    })
                    .collect())
            }
            Specification::InstancesOfClasses(of_classes) => {
                let supported = self.supported_schemas(None);
                let mut seeds = Vec::new();
                for selector in &of_classes.classes {
                    if let Some(class) = resolve_selector(&self.ctx, selector, &supported)? {
                        seeds.push(BranchSeed {
                            class,
                            path: None,
                            raw: None,
                            direction: None,
                        });
                    }
                }
                Ok(seeds)
            }
            Specification::RelatedInstances(related) => {
                let supported = self.supported_schemas(related.supported_schemas.as_deref());
                // Related traversal starts from the parent's instances; a
                // parent that is not instance-bearing yields nothing.
                let Some(parent_instances) = instance_ancestors.first() else {
                    return Ok(Vec::new());
                };
                let parent_classes = self.node_class_names(parent_instances);
                if parent_classes.is_empty() {
                    return Ok(Vec::new());
                }
                let path_branches = if related.skip_related_level > 0 {
                    resolve_skip_levels(
                        &self.ctx,
                        alloc,
                        &parent_classes,
                        related.skip_related_level,
                        related.direction,
                        &supported,
                    )?
                } else if !related.path.is_empty() {
                    resolve_path_branches(
                        &self.ctx,
                        alloc,
                        &parent_classes,
                        &related.path,
                        &supported,
                    )?
                } else {
                    // No explicit path: follow any direct relationship
                    // known to connect the parent's concrete classes.
                    resolve_skip_levels(
                        &self.ctx,
                        alloc,
                        &parent_classes,
                        1,
                        related.direction,
                        &supported,
                    )?
                };
                Ok(path_branches
                    .into_iter()
                    .map(|path| BranchSeed {
                        class: path.target.clone(),
                        direction: Some(path.direction),
                        path: Some(path),
                        raw: None,
                    })
                    .collect())
            }
            Specification::Search(search) => {
                let supported = self.supported_schemas(None);
                let mut seeds = Vec::new();
                for def in &search.queries {
                    let selector = crate::rules::ClassSelector::new(&def.class);
                    let Some(class) = resolve_selector(&self.ctx, &selector, &supported)? else {
                        continue;
                    };
                    let params = def.parameters.iter().map(json_to_param).collect();
                    seeds.push(BranchSeed {
                        class,
                        path: None,
                        raw: Some((def.query.clone(), params)),
                        direction: None,
                    });
                }
                Ok(seeds)
            }
        }
    }

    fn build_branch(
        &self,
        seed: BranchSeed,
        spec: &Specification,
        parent_node: Option<&CachedNode>,
        instance_ancestors: &[CachedNode],
        alloc: &mut AliasAllocator,
    ) -> Result<SortedBranch, QueryBuilderError> {
        let flags = spec.flags();
        let alias = alloc.next("e");
        let label = labels::display_label_expr(&self.ctx, &seed.class.descriptor, &alias);

        let mut metadata = ResultMetadata {
            direction: seed.direction,
            relationship_classes: Default::default(),
            instance_classes: seed
                .class
                .concrete_class_names(&self.ctx)
                .into_iter()
                .collect(),
            hints: hints_from_flags(flags),
        };
        if let Some(path) = &seed.path {
            for hop in &path.hops {
                metadata
                    .relationship_classes
                    .insert(hop.relationship.qualified_name());
            }
        }

        let mut extra_filters = Vec::new();

        let (related_joins, related_targets) = self.resolve_related_aliases(
            spec_related_aliases(spec),
            &alias,
            alloc,
            &mut metadata,
        );

        if let Some(filter_text) = spec_instance_filter(spec) {
            match self.filter_cache.parse(filter_text) {
                Ok(parsed) => {
                    let env = CompileEnv {
                        catalog: self.ctx.catalog,
                        this_class: &seed.class.descriptor.name,
                        this_alias: &alias,
                        ancestors: instance_ancestors,
                        related: &related_targets,
                        listener: self.ctx.used_classes,
                    };
                    if let Some(predicate) = compile_filter(parsed.as_ref(), &env) {
                        extra_filters.push(predicate);
                    }
                }
                Err(error) => {
                    log::warn!("ignoring unparsable instance filter: {error}");
                }
            }
        }

        let path = match seed.path {
            Some(branch) => {
                let parent_query = instance_ancestors
                    .first()
                    .and_then(|n| n.instance_query.clone());
                // resolve_seeds only produces path branches when the parent
                // is instance-bearing.
                parent_query.map(|parent_query| PathAttachment {
                    branch,
                    parent_query,
                })
            }
            None => None,
        };

        let source = match seed.raw {
            Some((sql, params)) => BranchSource::Raw { sql, params },
            None => BranchSource::Class,
        };

        let parts = BranchParts {
            alias,
            class: seed.class,
            label,
            source,
            path,
            related_joins,
            extra_filters,
            metadata,
        };

        let plan = grouping::resolve_plan(&self.ctx, &parts.class.descriptor.name, flags, parent_node);
        let level = grouping::build_level(&self.ctx, &plan, &parts, alloc)?;

        let decision = if level.grouped {
            SortDecision::Natural(level.tree.contract())
        } else {
            sorting::resolve_instance_sorting(&self.ctx, &parts.class.descriptor.name, flags)
        };
        let order_by = sorting::branch_order_by(&decision, &parts.alias);

        Ok(SortedBranch {
            tree: level.tree,
            decision,
            order_by,
        })
    }

    fn resolve_related_aliases(
        &self,
        specs: &[RelatedAliasSpec],
        entity_alias: &str,
        alloc: &mut AliasAllocator,
        metadata: &mut ResultMetadata,
    ) -> (Vec<JoinClause>, HashMap<String, RelatedTarget>) {
        let mut joins = Vec::new();
        let mut targets = HashMap::new();
        for spec in specs {
            let Some(relationship) = self.ctx.catalog.relationship_opt(&spec.relationship) else {
                log::warn!(
                    "related alias '{}' names unknown relationship '{}'",
                    spec.alias,
                    spec.relationship
                );
                continue;
            };
            let forward = spec.direction != RelDirection::Backward;
            let (start_col, end_col) = if forward {
                (path_resolver::COL_SOURCE_ID, path_resolver::COL_TARGET_ID)
            } else {
                (path_resolver::COL_TARGET_ID, path_resolver::COL_SOURCE_ID)
            };
            let target_class_name = spec.target_class.clone().unwrap_or_else(|| {
                if forward {
                    relationship.target.clone()
                } else {
                    relationship.source.clone()
                }
            });
            let Some(target_class) = self.ctx.catalog.class_opt(&target_class_name) else {
                log::warn!(
                    "related alias '{}' names unknown class '{}'",
                    spec.alias,
                    target_class_name
                );
                continue;
            };

            self.ctx
                .notify_class_used(&relationship.qualified_name(), true);
            self.ctx
                .notify_class_used(&target_class.qualified_name(), true);
            metadata
                .relationship_classes
                .insert(relationship.qualified_name());

            let rel_alias = alloc.next("r");
            let target_alias = alloc.next("e");
            joins.push(JoinClause {
                table: relationship.qualified_name(),
                alias: rel_alias.clone(),
                on: vec![SqlExpr::eq(
                    SqlExpr::property(&rel_alias, start_col),
                    SqlExpr::property(entity_alias, FIELD_INSTANCE_ID),
                )],
                kind: JoinKind::Inner,
            });
            joins.push(JoinClause {
                table: target_class.qualified_name(),
                alias: target_alias.clone(),
                on: vec![SqlExpr::eq(
                    SqlExpr::property(&target_alias, FIELD_INSTANCE_ID),
                    SqlExpr::property(&rel_alias, end_col),
                )],
                kind: JoinKind::Inner,
            });
            targets.insert(
                spec.alias.clone(),
                RelatedTarget {
                    sql_alias: target_alias,
                    class: target_class.name.clone(),
                },
            );
        }
        (joins, targets)
    }

    fn supported_schemas(&self, spec_override: Option<&str>) -> SupportedSchemas {
        match spec_override {
            Some(value) => SupportedSchemas::parse(value),
            None => self.ctx.ruleset.supported_schemas.clone(),
        }
    }

    fn node_class_names(&self, node: &CachedNode) -> Vec<String> {
        match &node.key {
            NodeKey::Instances { classes } => classes
                .iter()
                .filter_map(|id| self.ctx.catalog.class_by_id(*id))
                .map(|c| c.name.clone())
                .collect(),
            _ => Vec::new(),
        }
    }
}

fn hints_from_flags(flags: &SpecificationFlags) -> NodeHints {
    NodeHints {
        hide_if_no_children: flags.hide_if_no_children,
        hide_if_only_one_child: flags.hide_if_only_one_child,
        hide_in_hierarchy: flags.hide_nodes_in_hierarchy,
        hide_expression: flags.hide_expression.clone(),
        children_hint: flags.has_children,
    }
}

fn spec_instance_filter(spec: &Specification) -> Option<&str> {
    match spec {
        Specification::InstancesOfClasses(of_classes) => of_classes.instance_filter.as_deref(),
        Specification::RelatedInstances(related) => related.instance_filter.as_deref(),
        _ => None,
    }
}

fn spec_related_aliases(spec: &Specification) -> &[RelatedAliasSpec] {
    match spec {
        Specification::InstancesOfClasses(of_classes) => &of_classes.related_aliases,
        Specification::RelatedInstances(related) => &related.related_aliases,
        _ => &[],
    }
}

fn json_to_param(value: &serde_json::Value) -> ParamValue {
    match value {
        serde_json::Value::Null => ParamValue::Null,
        serde_json::Value::Bool(b) => ParamValue::Boolean(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                ParamValue::Integer(i)
            } else {
                ParamValue::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => ParamValue::String(s.clone()),
        other => ParamValue::String(other.to_string()),
    }
}

struct SortedBranch {
    tree: QueryTree,
    decision: SortDecision,
    order_by: Vec<crate::query_ast::OrderByItem>,
}

/// Merges branches of one request into the output sequence: branches
/// sharing a row contract union together (in branch order). When every
/// branch of a union shares one contract-based sort, it hoists to a single
/// outermost ORDER BY; otherwise each branch keeps its own ordering and no
/// overall re-sort is applied.
fn merge_branches(branches: Vec<SortedBranch>) -> Result<Vec<QueryTree>, QueryBuilderError> {
    let mut groups: Vec<(RowContract, Vec<SortedBranch>)> = Vec::new();
    for branch in branches {
        let contract = branch.tree.contract();
        match groups.iter_mut().find(|(c, _)| *c == contract) {
            Some((_, group)) => group.push(branch),
            None => groups.push((contract, vec![branch])),
        }
    }

    let mut output = Vec::new();
    for (contract, group) in groups {
        let uniform = group
            .windows(2)
            .all(|pair| pair[0].decision == pair[1].decision);
        if uniform && sorting::is_hoistable(&group[0].decision) {
            let trees: Vec<QueryTree> = group.into_iter().map(|b| b.tree).collect();
            let mut merged = QueryTree::union(trees)?;
            merged.set_outer_order_by(sorting::contract_order_by(contract));
            output.push(merged);
        } else {
            let trees: Vec<QueryTree> = group
                .into_iter()
                .map(|mut branch| {
                    branch.tree.set_outer_order_by(std::mem::take(&mut branch.order_by));
                    branch.tree
                })
                .collect();
            output.push(QueryTree::union(trees)?);
        }
    }
    Ok(output)
}

/// Notifies the used-classes listener about every class the rule set's
/// customization rules reference, for external cache invalidation.
pub fn notify_ruleset_classes(ctx: &ResolutionContext<'_>) {
    for label_override in &ctx.ruleset.label_overrides {
        if let Some(class) = ctx.catalog.class_opt(&label_override.class.class) {
            ctx.notify_class_used(&class.qualified_name(), label_override.class.polymorphic);
        }
    }
    for rule in &ctx.ruleset.grouping_rules {
        if let Some(class) = ctx.catalog.class_opt(&rule.class.class) {
            ctx.notify_class_used(&class.qualified_name(), rule.class.polymorphic);
        }
    }
    for rule in &ctx.ruleset.sorting_rules {
        if let Some(class) = ctx.catalog.class_opt(&rule.class.class) {
            ctx.notify_class_used(&class.qualified_name(), rule.class.polymorphic);
        }
    }
}
