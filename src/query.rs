use crate::policy::RTPolicy;

/// A SQL statement paired with a stable name.
///
/// The name is handed to the backend driver so it can key its
/// prepared-statement cache; two queries with the same name are expected to
/// carry the same statement text for the lifetime of the process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    statement: String,
    name: String,
}

impl Query {
    pub fn new(statement: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            name: name.into(),
        }
    }

    pub fn statement(&self) -> &str {
        &self.statement
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// The full-update form of a policy's query: the base query with the
/// policy's extra predicate appended, if it defines one.
pub fn full_query<P: RTPolicy>() -> Query {
    let base = P::query();
    let statement = match P::WHERE_CLAUSE {
        Some(clause) => format!("{} where {}", base.statement(), clause),
        None => base.statement().to_owned(),
    };
    Query::new(statement, format!("{}-full", P::NAME))
}

/// The delta form: restricted to rows whose update column reached the
/// watermark bound as `$1`. Degenerates to [`full_query`] for policies with
/// incremental updates disabled.
pub fn delta_query<P: RTPolicy>() -> Query {
    let Some(updated_field) = P::UPDATED_FIELD else {
        return full_query::<P>();
    };
    let base = P::query();
    let statement = match P::WHERE_CLAUSE {
        Some(clause) => format!(
            "{} where ({}) and {} >= $1",
            base.statement(),
            clause,
            updated_field
        ),
        None => format!("{} where {} >= $1", base.statement(), updated_field),
    };
    Query::new(statement, format!("{}-delta", P::NAME))
}
