//! Grouping engine tests: range buckets, state-machine advancement,
//! ancestor restrictions and same-label coalescing.

use test_case::test_case;

use super::{as_select, as_union, inner_of, nav_rule, Fixture};
use crate::hierarchy::{CachedNode, NodeId, NodeKey};
use crate::query_ast::sql_expr::{ParamValue, SqlExpr};
use crate::query_ast::{RowContract, FIELD_GROUPING_VALUE};
use crate::query_builder::context::ActiveGroupChooser;
use crate::query_builder::QueryBuilder;
use crate::rules::{
    ClassGroupSpec, ClassInstancesSpec, ClassMatch, ClassSelector, GroupSpec, GroupValueKind,
    GroupingRule, PropertyGroupSpec, PropertyRange, Specification, SpecificationFlags,
};

fn widget_scan(flags: SpecificationFlags) -> Specification {
    Specification::InstancesOfClasses(ClassInstancesSpec {
        classes: vec![ClassSelector::new("Widget")],
        instance_filter: None,
        related_aliases: vec![],
        flags,
    })
}

fn range(from: f64, to: f64) -> PropertyRange {
    PropertyRange {
        from,
        to,
        label: None,
    }
}

fn size_grouping_rule(ranges: Vec<PropertyRange>) -> GroupingRule {
    GroupingRule {
        class: ClassMatch {
            class: "Widget".to_string(),
            polymorphic: true,
        },
        priority: 100,
        groups: vec![GroupSpec::ByProperty(PropertyGroupSpec {
            property: "Size".to_string(),
            ranges,
            grouping_value: GroupValueKind::RawValue,
            sorting_value: GroupValueKind::RawValue,
            create_for_single_item: false,
        })],
    }
}

/// Evaluates the generated range CASE the way the engine would, walking
/// WHEN branches in order.
fn bucket_of(case: &SqlExpr, value: f64) -> i64 {
    let SqlExpr::Case(case) = case else {
        panic!("expected a CASE, found {case:?}");
    };
    for (when, then) in &case.when_then {
        let SqlExpr::Between {
            low,
            high,
            negated: false,
            ..
        } = when
        else {
            panic!("expected a BETWEEN, found {when:?}");
        };
        let (ParamValue::Float(low), ParamValue::Float(high)) = (low, high) else {
            panic!("expected bound range endpoints");
        };
        if value >= *low && value <= *high {
            let SqlExpr::Literal(ParamValue::Integer(index)) = then else {
                panic!("expected a bound bucket index");
            };
            return *index;
        }
    }
    let SqlExpr::Literal(ParamValue::Integer(other)) = case.else_expr.as_deref().unwrap() else {
        panic!("expected a bound fallback bucket");
    };
    *other
}

fn grouping_value_case(fixture: &Fixture, spec: &Specification) -> SqlExpr {
    let builder = QueryBuilder::new(fixture.ctx());
    let queries = builder.queries(None, &nav_rule(spec), spec).unwrap();
    let outer = as_select(&queries[0]);
    assert_eq!(outer.contract, RowContract::PropertyGroups);
    let inner = as_select(inner_of(outer));
    inner
        .fields
        .iter()
        .find(|f| f.alias == FIELD_GROUPING_VALUE)
        .expect("grouping value field")
        .expression
        .clone()
}

#[test_case(-1.0, -1; "below every range")]
#[test_case(1.0, 0; "first range lower bound")]
#[test_case(6.0, -1; "gap between ranges")]
#[test_case(9.0, 1; "second range upper bound")]
#[test_case(12.0, 2; "third range")]
#[test_case(16.0, -1; "above every range")]
fn range_probe_lands_in_exactly_one_bucket(value: f64, expected: i64) {
    let mut fixture = Fixture::new();
    fixture
        .ruleset
        .grouping_rules
        .push(size_grouping_rule(vec![
            range(1.0, 5.0),
            range(7.0, 9.0),
            range(10.0, 15.0),
        ]));
    let spec = widget_scan(SpecificationFlags::default());
    let case = grouping_value_case(&fixture, &spec);
    assert_eq!(bucket_of(&case, value), expected);
}

#[test]
fn overlapping_ranges_resolve_to_first_declared() {
    let mut fixture = Fixture::new();
    fixture
        .ruleset
        .grouping_rules
        .push(size_grouping_rule(vec![range(1.0, 5.0), range(4.0, 9.0)]));
    let spec = widget_scan(SpecificationFlags::default());
    let case = grouping_value_case(&fixture, &spec);
    assert_eq!(bucket_of(&case, 4.5), 0);
}

#[test]
fn class_grouping_is_produced_before_property_grouping() {
    let mut fixture = Fixture::new();
    fixture
        .ruleset
        .grouping_rules
        .push(size_grouping_rule(vec![]));
    let spec = widget_scan(SpecificationFlags {
        group_by_class: true,
        ..SpecificationFlags::default()
    });

    // Root level: class groups first.
    let builder = QueryBuilder::new(fixture.ctx());
    let queries = builder.queries(None, &nav_rule(&spec), &spec).unwrap();
    assert_eq!(queries[0].contract(), RowContract::ClassGroups);
}

#[test]
fn property_level_under_class_group_restricts_classes() {
    let mut fixture = Fixture::new();
    fixture
        .ruleset
        .grouping_rules
        .push(size_grouping_rule(vec![]));
    let gadget = fixture.catalog.class("Gadget").unwrap().id;
    let parent = NodeId("class-group".to_string());
    fixture.cache.insert(CachedNode {
        id: parent.clone(),
        key: NodeKey::ClassGroup {
            class: gadget,
            polymorphic: false,
        },
        instance_query: None,
        parent: None,
    });
    let spec = widget_scan(SpecificationFlags {
        group_by_class: true,
        ..SpecificationFlags::default()
    });

    let builder = QueryBuilder::new(fixture.ctx());
    let queries = builder.queries(Some(&parent), &nav_rule(&spec), &spec).unwrap();
    let outer = as_select(&queries[0]);
    assert_eq!(outer.contract, RowContract::PropertyGroups);

    let inner = as_select(inner_of(outer));
    let restricted = inner.filters.iter().any(|f| {
        matches!(f, SqlExpr::InList { items, negated: false, .. }
            if items.contains(&ParamValue::Id(gadget.0)))
    });
    assert!(restricted);
}

/// Multiple parent grouping values collapse into a single IN-clause on the
/// child level.
#[test]
fn property_group_parent_values_collapse_into_one_in_clause() {
    let mut fixture = Fixture::new();
    fixture
        .ruleset
        .grouping_rules
        .push(size_grouping_rule(vec![]));
    let widget = fixture.catalog.class("Widget").unwrap().id;
    let parent = NodeId("prop-group".to_string());
    fixture.cache.insert(CachedNode {
        id: parent.clone(),
        key: NodeKey::PropertyGroup {
            class: widget,
            property: "Size".to_string(),
            values: vec![ParamValue::Integer(3), ParamValue::Integer(4)],
            range_index: None,
        },
        instance_query: None,
        parent: None,
    });
    let spec = widget_scan(SpecificationFlags::default());

    let builder = QueryBuilder::new(fixture.ctx());
    let queries = builder.queries(Some(&parent), &nav_rule(&spec), &spec).unwrap();
    let select = as_select(&queries[0]);
    assert_eq!(select.contract, RowContract::Instances);
    let in_clause = select.filters.iter().find_map(|f| match f {
        SqlExpr::InList { items, .. } => Some(items.len()),
        _ => None,
    });
    assert_eq!(in_clause, Some(2));
}

/// Children of the synthesized "other" bucket are everything outside every
/// declared range.
#[test]
fn other_bucket_children_negate_every_range() {
    let mut fixture = Fixture::new();
    fixture
        .ruleset
        .grouping_rules
        .push(size_grouping_rule(vec![range(1.0, 5.0), range(7.0, 9.0)]));
    let widget = fixture.catalog.class("Widget").unwrap().id;
    let parent = NodeId("other-bucket".to_string());
    fixture.cache.insert(CachedNode {
        id: parent.clone(),
        key: NodeKey::PropertyGroup {
            class: widget,
            property: "Size".to_string(),
            values: vec![],
            range_index: Some(-1),
        },
        instance_query: None,
        parent: None,
    });
    let spec = widget_scan(SpecificationFlags::default());

    let builder = QueryBuilder::new(fixture.ctx());
    let queries = builder.queries(Some(&parent), &nav_rule(&spec), &spec).unwrap();
    let select = as_select(&queries[0]);
    let negated_ranges = select
        .filters
        .iter()
        .filter(|f| matches!(f, SqlExpr::Between { negated: true, .. }))
        .count();
    assert_eq!(negated_ranges, 2);
}

/// Same-label coalescing emits a groups branch (labels shared by at least
/// two siblings) and a singles branch, both under one contract; whether a
/// group node appears is decided by the data, not statically.
#[test]
fn same_label_grouping_coalesces_only_shared_labels() {
    let mut fixture = Fixture::new();
    fixture.ruleset.grouping_rules.push(GroupingRule {
        class: ClassMatch {
            class: "Widget".to_string(),
            polymorphic: true,
        },
        priority: 100,
        groups: vec![GroupSpec::SameLabelInstance],
    });
    let spec = widget_scan(SpecificationFlags::default());

    let builder = QueryBuilder::new(fixture.ctx());
    let queries = builder.queries(None, &nav_rule(&spec), &spec).unwrap();
    assert_eq!(queries.len(), 1);

    let union = as_union(&queries[0]);
    assert_eq!(union.contract, RowContract::GroupedInstances);
    assert_eq!(union.branches.len(), 2);

    let bound = queries[0].to_bound_query();
    assert!(bound.sql.contains("HAVING (COUNT(*) >= ?)"));
    assert!(bound.sql.contains("HAVING (COUNT(*) = ?)"));
    assert!(bound.params.contains(&ParamValue::Integer(2)));
    assert!(bound.params.contains(&ParamValue::Integer(1)));
}

#[test]
fn first_matching_rule_wins_entirely() {
    let mut fixture = Fixture::new();
    let mut low = size_grouping_rule(vec![]);
    low.priority = 5;
    low.groups = vec![GroupSpec::ByProperty(PropertyGroupSpec {
        property: "Code".to_string(),
        ranges: vec![],
        grouping_value: GroupValueKind::RawValue,
        sorting_value: GroupValueKind::RawValue,
        create_for_single_item: false,
    })];
    fixture.ruleset.grouping_rules.push(low);
    fixture
        .ruleset
        .grouping_rules
        .push(size_grouping_rule(vec![]));

    let spec = widget_scan(SpecificationFlags::default());
    let builder = QueryBuilder::new(fixture.ctx());
    let queries = builder.queries(None, &nav_rule(&spec), &spec).unwrap();
    let outer = as_select(&queries[0]);
    let inner = as_select(inner_of(outer));
    let grouping_value = &inner
        .fields
        .iter()
        .find(|f| f.alias == FIELD_GROUPING_VALUE)
        .unwrap()
        .expression;
    // The priority-100 Size rule wins over the priority-5 Code rule.
    assert!(
        matches!(grouping_value, SqlExpr::PropertyAccessExp(a) if a.column.0 == "Size"),
        "expected Size grouping, found {grouping_value:?}"
    );
}

#[test]
fn base_class_grouping_buckets_by_direct_subclass() {
    let mut fixture = Fixture::new();
    fixture.ruleset.grouping_rules.push(GroupingRule {
        class: ClassMatch {
            class: "Widget".to_string(),
            polymorphic: true,
        },
        priority: 100,
        groups: vec![GroupSpec::ByClass(ClassGroupSpec {
            base_class: Some("Widget".to_string()),
            create_for_single_item: false,
        })],
    });
    let spec = widget_scan(SpecificationFlags::default());

    let builder = QueryBuilder::new(fixture.ctx());
    let queries = builder.queries(None, &nav_rule(&spec), &spec).unwrap();
    let outer = as_select(&queries[0]);
    assert_eq!(outer.contract, RowContract::ClassGroups);

    let gadget = fixture.catalog.class("Gadget").unwrap().id;
    let mini = fixture.catalog.class("MiniGadget").unwrap().id;
    let group_field = &outer.fields[0].expression;
    let SqlExpr::Case(case) = group_field else {
        panic!("expected a CASE mapping, found {group_field:?}");
    };
    // MiniGadget buckets under Gadget; classes already at their bucket are
    // left to the ELSE arm.
    assert!(case.when_then.iter().any(|(when, then)| {
        matches!(when, SqlExpr::Literal(ParamValue::Id(id)) if *id == mini.0)
            && matches!(then, SqlExpr::Literal(ParamValue::Id(id)) if *id == gadget.0)
    }));
    assert!(!case
        .when_then
        .iter()
        .any(|(when, _)| matches!(when, SqlExpr::Literal(ParamValue::Id(id)) if *id == gadget.0)));
}

#[test]
fn label_group_parent_restricts_by_label() {
    let mut fixture = Fixture::new();
    let parent = NodeId("label-group".to_string());
    fixture.cache.insert(CachedNode {
        id: parent.clone(),
        key: NodeKey::LabelGroup {
            label: "Shared".to_string(),
        },
        instance_query: None,
        parent: None,
    });
    let spec = widget_scan(SpecificationFlags {
        group_by_label: true,
        ..SpecificationFlags::default()
    });

    let builder = QueryBuilder::new(fixture.ctx());
    let queries = builder.queries(Some(&parent), &nav_rule(&spec), &spec).unwrap();
    let select = as_select(&queries[0]);
    assert_eq!(select.contract, RowContract::Instances);
    let bound = select.clone().into_tree().to_bound_query();
    assert!(bound.params.contains(&ParamValue::String("Shared".to_string())));
}

struct PickSecond;

impl ActiveGroupChooser for PickSecond {
    fn active_group(&self, _rule: &GroupingRule) -> Option<usize> {
        Some(1)
    }
}

#[test]
fn active_group_chooser_selects_among_exclusive_specs() {
    let mut fixture = Fixture::new();
    let mut rule = size_grouping_rule(vec![]);
    rule.groups.push(GroupSpec::ByProperty(PropertyGroupSpec {
        property: "Code".to_string(),
        ranges: vec![],
        grouping_value: GroupValueKind::RawValue,
        sorting_value: GroupValueKind::RawValue,
        create_for_single_item: false,
    }));
    fixture.ruleset.grouping_rules.push(rule);

    let chooser = PickSecond;
    let ctx = fixture.ctx().with_active_group_chooser(&chooser);
    let builder = QueryBuilder::new(ctx);
    let spec = widget_scan(SpecificationFlags::default());
    let queries = builder.queries(None, &nav_rule(&spec), &spec).unwrap();
    let outer = as_select(&queries[0]);
    let inner = as_select(inner_of(outer));
    let grouping_value = &inner
        .fields
        .iter()
        .find(|f| f.alias == FIELD_GROUPING_VALUE)
        .unwrap()
        .expression;
    assert!(
        matches!(grouping_value, SqlExpr::PropertyAccessExp(a) if a.column.0 == "Code"),
        "expected Code grouping, found {grouping_value:?}"
    );
}
