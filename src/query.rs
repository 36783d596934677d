//! Parameterized `SELECT` building for the `find_*` / `count_*` operations.
//!
//! Column names are always `'static` strings picked by the caller from a
//! fixed set; every value goes through a bound parameter.

use rusqlite::types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Cursor pagination. `cursor` is the id of the first row of the page in the
/// active ordering; `skip` and `take` apply after it.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub cursor: Option<String>,
    pub skip: usize,
    pub take: Option<usize>,
}

#[cfg(test)]
impl Page {
    pub fn take(n: usize) -> Self {
        Self {
            take: Some(n),
            ..Self::default()
        }
    }

    pub fn after(cursor: impl Into<String>, take: usize) -> Self {
        Self {
            cursor: Some(cursor.into()),
            skip: 1,
            take: Some(take),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Query {
    table: &'static str,
    columns: &'static str,
    clauses: Vec<String>,
    params: Vec<Value>,
    order: (&'static str, SortOrder),
    page: Page,
}

impl Query {
    pub fn new(table: &'static str, columns: &'static str) -> Self {
        Self {
            table,
            columns,
            clauses: Vec::new(),
            params: Vec::new(),
            order: ("id", SortOrder::Asc),
            page: Page::default(),
        }
    }

    fn push(mut self, clause: String, value: Value) -> Self {
        self.params.push(value);
        self.clauses.push(clause.replace('?', &format!("?{}", self.params.len())));
        self
    }

    pub fn eq(self, column: &'static str, value: impl Into<Value>) -> Self {
        self.push(format!("{} = ?", column), value.into())
    }

    /// Case-insensitive equality for text columns. Relies on the `casefold`
    /// function `Database` registers on its connection.
    pub fn eq_ignore_case(self, column: &'static str, value: impl Into<String>) -> Self {
        let value = value.into().to_lowercase();
        self.push(format!("casefold({}) = ?", column), Value::Text(value))
    }

    /// Case-insensitive substring match.
    pub fn contains(self, column: &'static str, needle: impl Into<String>) -> Self {
        let pattern = format!("%{}%", escape_like(&needle.into().to_lowercase()));
        self.push(format!("casefold({}) LIKE ? ESCAPE '\\'", column), Value::Text(pattern))
    }

    pub fn gte(self, column: &'static str, value: impl Into<Value>) -> Self {
        self.push(format!("{} >= ?", column), value.into())
    }

    pub fn lte(self, column: &'static str, value: impl Into<Value>) -> Self {
        self.push(format!("{} <= ?", column), value.into())
    }

    pub fn eq_opt<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.eq(column, v),
            None => self,
        }
    }

    pub fn contains_opt(self, column: &'static str, needle: Option<&str>) -> Self {
        match needle {
            Some(n) => self.contains(column, n),
            None => self,
        }
    }

    pub fn order_by(mut self, column: &'static str, order: SortOrder) -> Self {
        self.order = (column, order);
        self
    }

    pub fn page(mut self, page: Page) -> Self {
        self.page = page;
        self
    }

    fn where_sql(&self, extra: Option<String>) -> String {
        let mut clauses: Vec<String> = self.clauses.clone();
        clauses.extend(extra);
        if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        }
    }

    pub fn select_sql(&self) -> (String, Vec<Value>) {
        let mut params = self.params.clone();
        let (column, order) = self.order;

        let cursor_clause = self.page.cursor.as_ref().map(|cursor| {
            params.push(Value::Text(cursor.clone()));
            let op = match order {
                SortOrder::Asc => ">=",
                SortOrder::Desc => "<=",
            };
            // Row-value comparison keeps ties on the sort column stable via id.
            format!(
                "({col}, id) {op} (SELECT {col}, id FROM {table} WHERE id = ?{n})",
                col = column,
                op = op,
                table = self.table,
                n = params.len()
            )
        });

        let mut sql = format!(
            "SELECT {} FROM {}{} ORDER BY {} {}, id {}",
            self.columns,
            self.table,
            self.where_sql(cursor_clause),
            column,
            order.as_sql(),
            order.as_sql()
        );

        match (self.page.take, self.page.skip) {
            (Some(take), skip) => sql.push_str(&format!(" LIMIT {} OFFSET {}", take, skip)),
            (None, 0) => {}
            (None, skip) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", skip)),
        }

        (sql, params)
    }

    pub fn count_sql(&self) -> (String, Vec<Value>) {
        (
            format!("SELECT COUNT(*) FROM {}{}", self.table, self.where_sql(None)),
            self.params.clone(),
        )
    }
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
