//! Table-definition vocabulary shared by the DDL Compiler (C5) and History Model
//! Factory (C6). Analogous in spirit to a generic catalog's `Schema`/`Column`
//! types, but scoped to exactly what the temporal DDL operations need.

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    pub sql_type: String,
    pub nullable: bool,
    pub default: Option<String>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            nullable: true,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    pub fn to_sql(&self) -> String {
        let mut s = format!(
            "{} {}",
            crate::quoting::quote_ident(&self.name),
            self.sql_type
        );
        if !self.nullable {
            s.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            s.push_str(&format!(" DEFAULT {default}"));
        }
        s
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub fillfactor: Option<u8>,
}

impl IndexDefinition {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            unique: false,
            fillfactor: None,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_fillfactor(mut self, fillfactor: u8) -> Self {
        self.fillfactor = Some(fillfactor);
        self
    }

    /// The history-table counterpart of a current-table index has any `UNIQUE`
    /// flag stripped — uniqueness is incompatible with multiple versions of the
    /// same logical row.
    pub fn without_unique(&self) -> Self {
        Self {
            unique: false,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    pub primary_key: Option<String>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: None,
        }
    }

    pub fn with_column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = Some(column.into());
        self
    }
}

/// Describes a temporal entity for the History Model Factory and Timestamp
/// Enumerator: its logical name, the associated tables that are themselves
/// temporal, and the kind of association (for C8's `belongs_to`/`has_one` filter).
#[derive(Debug, Clone)]
pub struct TemporalEntityDescriptor {
    pub name: String,
    pub primary_key: String,
    pub associations: Vec<Association>,
}

impl TemporalEntityDescriptor {
    pub fn new(name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: primary_key.into(),
            associations: Vec::new(),
        }
    }

    pub fn with_association(mut self, association: Association) -> Self {
        self.associations.push(association);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationKind {
    BelongsTo,
    HasOne,
    /// Any other association kind (`has_many`, polymorphic, etc). C8 excludes
    /// these from timestamp enumeration.
    Other,
}

#[derive(Debug, Clone)]
pub struct Association {
    pub name: String,
    pub kind: AssociationKind,
    pub target: TemporalEntityDescriptor,
    pub is_polymorphic: bool,
    pub is_temporal: bool,
}
