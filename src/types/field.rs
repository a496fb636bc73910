/// Describes one column of a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMeta {
    pub name: String,
    /// Engine type name, e.g. `int4` or `varchar`.
    pub type_name: String,
    /// Widest rendered value in the column. Zero until the result is buffered.
    pub length: usize,
}

impl FieldMeta {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            length: 0,
        }
    }
}
