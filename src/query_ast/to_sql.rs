//! Query-tree serialization to SQL text with positional bound parameters.
//!
//! Literal values never appear in the text; every one is emitted as a `?`
//! placeholder with its value appended to the parameter list, in placeholder
//! order.

use super::sql_expr::{Operator, OperatorApplication, ParamValue, SqlExpr};
use super::{JoinKind, OrderByItem, OrderByOrder, QueryTree, SelectQuery, SelectSource, UnionQuery};

pub(crate) trait WriteSql {
    fn write_sql(&self, sql: &mut String, params: &mut Vec<ParamValue>);
}

pub(crate) fn write_query_tree(tree: &QueryTree, sql: &mut String, params: &mut Vec<ParamValue>) {
    match tree {
        QueryTree::Select(select) => select.write_sql(sql, params),
        QueryTree::Union(union) => union.write_sql(sql, params),
    }
}

impl WriteSql for SelectQuery {
    fn write_sql(&self, sql: &mut String, params: &mut Vec<ParamValue>) {
        sql.push_str("SELECT ");
        for (i, field) in self.fields.iter().enumerate() {
            field.expression.write_sql(sql, params);
            sql.push_str(" AS ");
            sql.push_str(&field.alias);
            if i + 1 < self.fields.len() {
                sql.push_str(", ");
            }
        }

        sql.push_str(" FROM ");
        match &self.source {
            SelectSource::Class(class) => {
                if !class.polymorphic {
                    sql.push_str("ONLY ");
                }
                sql.push_str(&class.qualified_name);
                sql.push_str(" AS ");
                sql.push_str(&class.alias);
            }
            SelectSource::Subquery { input, alias } => {
                sql.push('(');
                write_query_tree(input, sql, params);
                sql.push_str(") AS ");
                sql.push_str(alias);
            }
            SelectSource::Raw {
                sql: raw,
                params: raw_params,
                alias,
            } => {
                sql.push('(');
                sql.push_str(raw);
                sql.push_str(") AS ");
                sql.push_str(alias);
                params.extend(raw_params.iter().cloned());
            }
        }

        for join in &self.joins {
            match join.kind {
                JoinKind::Inner => sql.push_str(" JOIN "),
                JoinKind::Left => sql.push_str(" LEFT JOIN "),
            }
            sql.push_str(&join.table);
            sql.push_str(" AS ");
            sql.push_str(&join.alias);
            sql.push_str(" ON ");
            write_conjunction(&join.on, sql, params);
        }

        if !self.filters.is_empty() {
            sql.push_str(" WHERE ");
            write_conjunction(&self.filters, sql, params);
        }

        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            for (i, expr) in self.group_by.iter().enumerate() {
                expr.write_sql(sql, params);
                if i + 1 < self.group_by.len() {
                    sql.push_str(", ");
                }
            }
        }

        if !self.having.is_empty() {
            sql.push_str(" HAVING ");
            write_conjunction(&self.having, sql, params);
        }

        write_order_by(&self.order_by, sql, params);
    }
}

impl WriteSql for UnionQuery {
    fn write_sql(&self, sql: &mut String, params: &mut Vec<ParamValue>) {
        for (i, branch) in self.branches.iter().enumerate() {
            sql.push('(');
            write_query_tree(branch, sql, params);
            sql.push(')');
            if i + 1 < self.branches.len() {
                sql.push_str(" UNION ALL ");
            }
        }
        write_order_by(&self.order_by, sql, params);
    }
}

fn write_order_by(order_by: &[OrderByItem], sql: &mut String, params: &mut Vec<ParamValue>) {
    if order_by.is_empty() {
        return;
    }
    sql.push_str(" ORDER BY ");
    for (i, item) in order_by.iter().enumerate() {
        item.expression.write_sql(sql, params);
        match item.order {
            OrderByOrder::Asc => sql.push_str(" ASC"),
            OrderByOrder::Desc => sql.push_str(" DESC"),
        }
        if i + 1 < order_by.len() {
            sql.push_str(", ");
        }
    }
}

fn write_conjunction(predicates: &[SqlExpr], sql: &mut String, params: &mut Vec<ParamValue>) {
    for (i, predicate) in predicates.iter().enumerate() {
        predicate.write_sql(sql, params);
        if i + 1 < predicates.len() {
            sql.push_str(" AND ");
        }
    }
}

impl WriteSql for SqlExpr {
    fn write_sql(&self, sql: &mut String, params: &mut Vec<ParamValue>) {
        match self {
            SqlExpr::Literal(value) => {
                sql.push('?');
                params.push(value.clone());
            }
            SqlExpr::Column(column) => sql.push_str(&column.0),
            SqlExpr::PropertyAccessExp(access) => {
                sql.push_str(&access.table_alias.0);
                sql.push('.');
                sql.push_str(&access.column.0);
            }
            SqlExpr::Star => sql.push('*'),
            SqlExpr::ScalarFnCall(call) => write_fn_call(&call.name, &call.args, sql, params),
            SqlExpr::AggregateFnCall(call) => write_fn_call(&call.name, &call.args, sql, params),
            SqlExpr::OperatorApplicationExp(application) => {
                write_operator_application(application, sql, params)
            }
            SqlExpr::Like { expr, pattern } => {
                expr.write_sql(sql, params);
                sql.push_str(" LIKE ? ESCAPE '\\'");
                params.push(pattern.clone());
            }
            SqlExpr::InList {
                expr,
                items,
                negated,
            } => {
                expr.write_sql(sql, params);
                sql.push_str(if *negated { " NOT IN (" } else { " IN (" });
                for (i, item) in items.iter().enumerate() {
                    sql.push('?');
                    params.push(item.clone());
                    if i + 1 < items.len() {
                        sql.push_str(", ");
                    }
                }
                sql.push(')');
            }
            SqlExpr::InBoundQuery(in_bound) => {
                in_bound.expr.write_sql(sql, params);
                sql.push_str(if in_bound.negated { " NOT IN (" } else { " IN (" });
                sql.push_str(&in_bound.query.sql);
                sql.push(')');
                params.extend(in_bound.query.params.iter().cloned());
            }
            SqlExpr::BoundSubquery(query) => {
                sql.push('(');
                sql.push_str(&query.sql);
                sql.push(')');
                params.extend(query.params.iter().cloned());
            }
            SqlExpr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                expr.write_sql(sql, params);
                sql.push_str(if *negated {
                    " NOT BETWEEN ? AND ?"
                } else {
                    " BETWEEN ? AND ?"
                });
                params.push(low.clone());
                params.push(high.clone());
            }
            SqlExpr::Case(case) => {
                sql.push_str("CASE");
                if let Some(operand) = &case.expr {
                    sql.push(' ');
                    operand.write_sql(sql, params);
                }
                for (when, then) in &case.when_then {
                    sql.push_str(" WHEN ");
                    when.write_sql(sql, params);
                    sql.push_str(" THEN ");
                    then.write_sql(sql, params);
                }
                if let Some(else_expr) = &case.else_expr {
                    sql.push_str(" ELSE ");
                    else_expr.write_sql(sql, params);
                }
                sql.push_str(" END");
            }
        }
    }
}

fn write_fn_call(name: &str, args: &[SqlExpr], sql: &mut String, params: &mut Vec<ParamValue>) {
    sql.push_str(name);
    sql.push('(');
    for (i, arg) in args.iter().enumerate() {
        arg.write_sql(sql, params);
        if i + 1 < args.len() {
            sql.push_str(", ");
        }
    }
    sql.push(')');
}

fn write_operator_application(
    application: &OperatorApplication,
    sql: &mut String,
    params: &mut Vec<ParamValue>,
) {
    match application.operator {
        Operator::Not => {
            sql.push_str("NOT (");
            application.operands[0].write_sql(sql, params);
            sql.push(')');
        }
        Operator::IsNull | Operator::IsNotNull => {
            application.operands[0].write_sql(sql, params);
            sql.push(' ');
            sql.push_str(application.operator.as_sql());
        }
        Operator::And | Operator::Or => {
            sql.push('(');
            for (i, operand) in application.operands.iter().enumerate() {
                operand.write_sql(sql, params);
                if i + 1 < application.operands.len() {
                    sql.push(' ');
                    sql.push_str(application.operator.as_sql());
                    sql.push(' ');
                }
            }
            sql.push(')');
        }
        _ => {
            sql.push('(');
            application.operands[0].write_sql(sql, params);
            sql.push(' ');
            sql.push_str(application.operator.as_sql());
            sql.push(' ');
            application.operands[1].write_sql(sql, params);
            sql.push(')');
        }
    }
}
