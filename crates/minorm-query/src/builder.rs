//! Lookup-by-identifier statement builders.
//!
//! Both builders emit quoted identifiers and dialect placeholders; every
//! value travels in the returned parameter list, never in the SQL text.

use minorm_core::{Dialect, Error, QueryError, Result, TableInfo, Value};

/// SELECT of one row by identifier.
#[derive(Debug, Clone, Copy)]
pub struct SelectById<'a> {
    table: &'a TableInfo,
}

impl<'a> SelectById<'a> {
    pub fn new(table: &'a TableInfo) -> Self {
        Self { table }
    }

    /// Build the SELECT SQL and parameters with the default dialect (SQLite).
    pub fn build(&self, id: Value) -> (String, Vec<Value>) {
        self.build_with_dialect(Dialect::default(), id)
    }

    /// Build the SELECT SQL and parameters with a specific dialect.
    ///
    /// Columns are listed explicitly in declaration order; the identifier
    /// is the single bound parameter.
    pub fn build_with_dialect(&self, dialect: Dialect, id: Value) -> (String, Vec<Value>) {
        let columns: Vec<String> = self
            .table
            .fields
            .iter()
            .map(|f| dialect.quote_identifier(f.column_name))
            .collect();

        let sql = format!(
            "SELECT {} FROM {} WHERE {} = {}",
            columns.join(", "),
            dialect.quote_identifier(self.table.table_name),
            dialect.quote_identifier(self.table.id_column()),
            dialect.placeholder(1)
        );
        (sql, vec![id])
    }
}

/// UPDATE of one row by identifier, setting only the given columns.
#[derive(Debug, Clone)]
pub struct UpdateById<'a> {
    table: &'a TableInfo,
    id: Value,
    /// (column index, new value); kept sorted by column index.
    sets: Vec<(usize, Value)>,
    unknown: Vec<String>,
}

impl<'a> UpdateById<'a> {
    pub fn new(table: &'a TableInfo, id: Value) -> Self {
        Self {
            table,
            id,
            sets: Vec::new(),
            unknown: Vec::new(),
        }
    }

    /// Set `column` to `value`. Setting the same column twice keeps the
    /// last value.
    pub fn set(mut self, column: &str, value: Value) -> Self {
        match self.table.column_index(column) {
            Some(index) => match self.sets.binary_search_by_key(&index, |(i, _)| *i) {
                Ok(pos) => self.sets[pos].1 = value,
                Err(pos) => self.sets.insert(pos, (index, value)),
            },
            None => self.unknown.push(column.to_string()),
        }
        self
    }

    /// Number of columns in the SET clause.
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Build the UPDATE SQL and parameters with the default dialect (SQLite).
    pub fn build(&self) -> Result<(String, Vec<Value>)> {
        self.build_with_dialect(Dialect::default())
    }

    /// Build the UPDATE SQL and parameters with a specific dialect.
    ///
    /// One `SET col = ?` per column in declaration order, then the
    /// identifier as the last parameter. Fails if nothing is set, if a
    /// column is not mapped by the entity, or if the identifier column
    /// itself is set.
    pub fn build_with_dialect(&self, dialect: Dialect) -> Result<(String, Vec<Value>)> {
        let entity = self.table.entity;
        if let Some(column) = self.unknown.first() {
            return Err(Error::Query(QueryError::build(format!(
                "{} has no column '{}'",
                entity, column
            ))));
        }
        if self.sets.is_empty() {
            return Err(Error::Query(QueryError::build(format!(
                "UPDATE of {} without any column to set",
                entity
            ))));
        }
        if self.sets.iter().any(|(i, _)| *i == self.table.id_index) {
            return Err(Error::Query(QueryError::build(format!(
                "the identifier column of {} cannot be updated",
                entity
            ))));
        }

        let mut params = Vec::with_capacity(self.sets.len() + 1);
        let mut set_clauses = Vec::with_capacity(self.sets.len());
        for (i, (index, value)) in self.sets.iter().enumerate() {
            let column = self.table.fields[*index].column_name;
            set_clauses.push(format!(
                "{} = {}",
                dialect.quote_identifier(column),
                dialect.placeholder(i + 1)
            ));
            params.push(value.clone());
        }

        let sql = format!(
            "UPDATE {} SET {} WHERE {} = {}",
            dialect.quote_identifier(self.table.table_name),
            set_clauses.join(", "),
            dialect.quote_identifier(self.table.id_column()),
            dialect.placeholder(params.len() + 1)
        );
        params.push(self.id.clone());

        tracing::trace!(sql = %sql, params = params.len(), "Built UPDATE");
        Ok((sql, params))
    }
}
