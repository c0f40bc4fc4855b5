//! Small SQL AST and its PostgreSQL renderer
//!
//! Values never end up in the SQL text: every [`SqlExpr::Param`] is
//! rendered as a `$n` placeholder and collected in order, so the result
//! can be handed to `sea_orm::Statement::from_sql_and_values`.

use sea_orm::Value;
use strata_core::quote_ident;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    /// `jsonb -> index`
    Arrow,
}

impl BinOp {
    fn as_sql(&self) -> &'static str {
        match self {
            BinOp::Eq => "=",
            BinOp::Ne => "<>",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Like => "LIKE",
            BinOp::Arrow => "->",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlExpr {
    Column {
        table: String,
        column: String,
    },
    /// `"table"."column"->>'key'`
    JsonText {
        table: String,
        column: String,
        key: String,
    },
    Param(Value),
    /// Inline string literal, only used for JSON keys and paths
    Literal(String),
    /// Inline integer literal
    Number(i64),
    Null,
    Star,
    Binary {
        left: Box<SqlExpr>,
        op: BinOp,
        right: Box<SqlExpr>,
    },
    Not(Box<SqlExpr>),
    IsNull(Box<SqlExpr>),
    IsNotNull(Box<SqlExpr>),
    And(Vec<SqlExpr>),
    Or(Vec<SqlExpr>),
    Func {
        name: &'static str,
        args: Vec<SqlExpr>,
    },
    Cast {
        expr: Box<SqlExpr>,
        ty: &'static str,
    },
}

impl SqlExpr {
    pub fn column(table: impl Into<String>, column: impl Into<String>) -> Self {
        SqlExpr::Column {
            table: table.into(),
            column: column.into(),
        }
    }

    pub fn param(value: impl Into<Value>) -> Self {
        SqlExpr::Param(value.into())
    }

    pub fn binary(left: SqlExpr, op: BinOp, right: SqlExpr) -> Self {
        SqlExpr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn eq(left: SqlExpr, right: SqlExpr) -> Self {
        Self::binary(left, BinOp::Eq, right)
    }

    pub fn func(name: &'static str, args: Vec<SqlExpr>) -> Self {
        SqlExpr::Func { name, args }
    }

    pub fn cast(expr: SqlExpr, ty: &'static str) -> Self {
        SqlExpr::Cast {
            expr: Box::new(expr),
            ty,
        }
    }

    pub fn is_null(self) -> Self {
        SqlExpr::IsNull(Box::new(self))
    }

    pub fn is_not_null(self) -> Self {
        SqlExpr::IsNotNull(Box::new(self))
    }

    pub fn not(self) -> Self {
        SqlExpr::Not(Box::new(self))
    }

    /// Conjunction of `items`; `None` when there is nothing to combine
    pub fn all(mut items: Vec<SqlExpr>) -> Option<SqlExpr> {
        match items.len() {
            0 => None,
            1 => items.pop(),
            _ => Some(SqlExpr::And(items)),
        }
    }

    pub fn any(mut items: Vec<SqlExpr>) -> Option<SqlExpr> {
        match items.len() {
            0 => None,
            1 => items.pop(),
            _ => Some(SqlExpr::Or(items)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: SqlExpr,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FromItem {
    Table { name: String, alias: Option<String> },
    Subquery { query: Box<Select>, alias: String },
}

impl FromItem {
    pub fn table(name: impl Into<String>) -> Self {
        FromItem::Table {
            name: name.into(),
            alias: None,
        }
    }

    pub fn aliased(name: impl Into<String>, alias: impl Into<String>) -> Self {
        FromItem::Table {
            name: name.into(),
            alias: Some(alias.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    LeftOuter,
    Inner,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub item: FromItem,
    pub on: SqlExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub expr: SqlExpr,
    pub desc: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Select {
    pub distinct: bool,
    pub distinct_on: Vec<SqlExpr>,
    pub columns: Vec<SelectItem>,
    pub from: Option<FromItem>,
    pub joins: Vec<Join>,
    pub filter: Option<SqlExpr>,
    pub group_by: Vec<SqlExpr>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Renders a [`Select`] into SQL text and positional values
#[derive(Debug, Default)]
pub struct SqlRenderer {
    sql: String,
    values: Vec<Value>,
}

impl SqlRenderer {
    pub fn render(select: &Select) -> (String, Vec<Value>) {
        let mut renderer = SqlRenderer::default();
        renderer.select(select);
        (renderer.sql, renderer.values)
    }

    /// Render a lone expression, handy for conditions in tests and logs
    pub fn render_expr(expr: &SqlExpr) -> (String, Vec<Value>) {
        let mut renderer = SqlRenderer::default();
        renderer.condition(expr);
        (renderer.sql, renderer.values)
    }

    fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    fn list<T>(&mut self, items: &[T], sep: &str, mut each: impl FnMut(&mut Self, &T)) {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.push(sep);
            }
            each(self, item);
        }
    }

    fn select(&mut self, select: &Select) {
        self.push("SELECT ");
        if !select.distinct_on.is_empty() {
            self.push("DISTINCT ON (");
            self.list(&select.distinct_on, ", ", |r, e| r.expr(e));
            self.push(") ");
        } else if select.distinct {
            self.push("DISTINCT ");
        }

        if select.columns.is_empty() {
            self.push("*");
        } else {
            self.list(&select.columns, ", ", |r, item| {
                r.expr(&item.expr);
                if let Some(alias) = &item.alias {
                    r.push(" AS ");
                    r.push(&quote_ident(alias));
                }
            });
        }

        if let Some(from) = &select.from {
            self.push(" FROM ");
            self.from_item(from);
        }
        for join in &select.joins {
            self.push(match join.kind {
                JoinKind::LeftOuter => " LEFT OUTER JOIN ",
                JoinKind::Inner => " JOIN ",
            });
            self.from_item(&join.item);
            self.push(" ON ");
            self.condition(&join.on);
        }
        if let Some(filter) = &select.filter {
            self.push(" WHERE ");
            self.condition(filter);
        }
        if !select.group_by.is_empty() {
            self.push(" GROUP BY ");
            self.list(&select.group_by, ", ", |r, e| r.expr(e));
        }
        if !select.order_by.is_empty() {
            self.push(" ORDER BY ");
            self.list(&select.order_by, ", ", |r, order| {
                r.expr(&order.expr);
                r.push(if order.desc { " DESC" } else { " ASC" });
            });
        }
        if let Some(limit) = select.limit {
            self.push(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = select.offset {
            self.push(&format!(" OFFSET {}", offset));
        }
    }

    fn from_item(&mut self, item: &FromItem) {
        match item {
            FromItem::Table { name, alias } => {
                self.push(&quote_ident(name));
                if let Some(alias) = alias {
                    self.push(" AS ");
                    self.push(&quote_ident(alias));
                }
            }
            FromItem::Subquery { query, alias } => {
                self.push("(");
                self.select(query);
                self.push(") AS ");
                self.push(&quote_ident(alias));
            }
        }
    }

    /// Top level conjunctions are rendered without parentheses
    fn condition(&mut self, expr: &SqlExpr) {
        match expr {
            SqlExpr::And(items) => self.list(items, " AND ", |r, e| r.expr(e)),
            other => self.expr(other),
        }
    }

    fn expr(&mut self, expr: &SqlExpr) {
        match expr {
            SqlExpr::Column { table, column } => {
                self.push(&quote_ident(table));
                self.push(".");
                self.push(&quote_ident(column));
            }
            SqlExpr::JsonText { table, column, key } => {
                self.push(&quote_ident(table));
                self.push(".");
                self.push(&quote_ident(column));
                self.push("->>");
                self.literal(key);
            }
            SqlExpr::Param(value) => {
                self.values.push(value.clone());
                self.push(&format!("${}", self.values.len()));
            }
            SqlExpr::Literal(text) => self.literal(text),
            SqlExpr::Number(n) => self.push(&n.to_string()),
            SqlExpr::Null => self.push("NULL"),
            SqlExpr::Star => self.push("*"),
            SqlExpr::Binary { left, op, right } => {
                self.expr(left);
                self.push(" ");
                self.push(op.as_sql());
                self.push(" ");
                self.expr(right);
            }
            SqlExpr::Not(inner) => {
                self.push("NOT (");
                self.condition(inner);
                self.push(")");
            }
            SqlExpr::IsNull(inner) => {
                self.expr(inner);
                self.push(" IS NULL");
            }
            SqlExpr::IsNotNull(inner) => {
                self.expr(inner);
                self.push(" IS NOT NULL");
            }
            SqlExpr::And(items) => {
                self.push("(");
                self.list(items, " AND ", |r, e| r.expr(e));
                self.push(")");
            }
            SqlExpr::Or(items) => {
                self.push("(");
                self.list(items, " OR ", |r, e| r.expr(e));
                self.push(")");
            }
            SqlExpr::Func { name, args } => {
                self.push(name);
                self.push("(");
                self.list(args, ", ", |r, e| r.expr(e));
                self.push(")");
            }
            SqlExpr::Cast { expr, ty } => {
                self.push("CAST(");
                self.expr(expr);
                self.push(" AS ");
                self.push(ty);
                self.push(")");
            }
        }
    }

    fn literal(&mut self, text: &str) {
        self.push("'");
        self.push(&text.replace('\'', "''"));
        self.push("'");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_select_with_params() {
        let select = Select {
            columns: vec![SelectItem {
                expr: SqlExpr::column("City", "name"),
                alias: None,
            }],
            from: Some(FromItem::table("City")),
            filter: SqlExpr::all(vec![
                SqlExpr::eq(SqlExpr::column("City", "code"), SqlExpr::param("lt")),
                SqlExpr::Or(vec![
                    SqlExpr::column("City", "a").is_null(),
                    SqlExpr::binary(SqlExpr::column("City", "b"), BinOp::Gt, SqlExpr::param(5i64)),
                ]),
            ]),
            limit: Some(10),
            ..Default::default()
        };
        let (sql, values) = SqlRenderer::render(&select);
        assert_eq!(
            sql,
            "SELECT \"City\".\"name\" FROM \"City\" WHERE \"City\".\"code\" = $1 AND \
             (\"City\".\"a\" IS NULL OR \"City\".\"b\" > $2) LIMIT 10"
        );
        assert_eq!(values, vec![Value::from("lt"), Value::from(5i64)]);
    }

    #[test]
    fn test_render_subquery_join_and_json() {
        let sub = Select {
            distinct: true,
            columns: vec![SelectItem {
                expr: SqlExpr::column("City/:list/notes", "_rid"),
                alias: None,
            }],
            from: Some(FromItem::table("City/:list/notes")),
            filter: Some(SqlExpr::eq(
                SqlExpr::column("City/:list/notes", "note"),
                SqlExpr::param("x"),
            )),
            ..Default::default()
        };
        let select = Select {
            columns: vec![SelectItem {
                expr: SqlExpr::JsonText {
                    table: "City".into(),
                    column: "name".into(),
                    key: "lt".into(),
                },
                alias: Some("name@lt".into()),
            }],
            from: Some(FromItem::table("City")),
            joins: vec![Join {
                kind: JoinKind::LeftOuter,
                item: FromItem::Subquery {
                    query: Box::new(sub),
                    alias: "notes_1".into(),
                },
                on: SqlExpr::eq(
                    SqlExpr::column("notes_1", "_rid"),
                    SqlExpr::column("City", "_id"),
                ),
            }],
            filter: Some(SqlExpr::column("notes_1", "_rid").is_not_null()),
            ..Default::default()
        };
        let (sql, values) = SqlRenderer::render(&select);
        assert_eq!(
            sql,
            "SELECT \"City\".\"name\"->>'lt' AS \"name@lt\" FROM \"City\" \
             LEFT OUTER JOIN (SELECT DISTINCT \"City/:list/notes\".\"_rid\" FROM \"City/:list/notes\" \
             WHERE \"City/:list/notes\".\"note\" = $1) AS \"notes_1\" \
             ON \"notes_1\".\"_rid\" = \"City\".\"_id\" WHERE \"notes_1\".\"_rid\" IS NOT NULL"
        );
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn test_literal_escaping() {
        let (sql, values) = SqlRenderer::render_expr(&SqlExpr::Literal("it's".into()));
        assert_eq!(sql, "'it''s'");
        assert!(values.is_empty());
    }
}
