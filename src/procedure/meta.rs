use specta::DataType;

use super::ProcedureKind;

/// Type information for a procedure, for consumption by client code generators.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub(crate) kind: ProcedureKind,
    pub(crate) input: DataType,
    pub(crate) output: DataType,
}

impl Metadata {
    pub fn kind(&self) -> ProcedureKind {
        self.kind
    }

    /// The type decoded from the request.
    pub fn input(&self) -> &DataType {
        &self.input
    }

    /// The type of the result, or of each event for streaming procedures.
    pub fn output(&self) -> &DataType {
        &self.output
    }
}
