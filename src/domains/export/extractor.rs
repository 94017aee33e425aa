use super::value::ExportValue;

/// Resolves a dotted path against a record. Any missing step, or a scalar
/// reached before the path is exhausted, yields `Null`.
pub fn extract(record: &ExportValue, path: &str) -> ExportValue {
    let mut segments = path.split('.');
    let first = match segments.next() {
        Some(segment) => segment,
        None => return ExportValue::Null,
    };

    let mut current = match record.child(first) {
        Some(value) => value,
        None => return ExportValue::Null,
    };

    for segment in segments {
        current = match current.child(segment) {
            Some(value) => value,
            None => return ExportValue::Null,
        };
    }

    current
}
