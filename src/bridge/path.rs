/// A parsed dotted property path such as `style.color`.
///
/// Resolution walks every segment except the last and errors if an
/// intermediate segment is undefined; the final segment is read or written by
/// the caller. A single-segment path addresses the element root directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DottedPath {
    segments: Vec<String>,
}

impl DottedPath {
    pub fn parse(name: &str) -> Self {
        Self {
            segments: name.split('.').map(str::to_string).collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_single(&self) -> bool {
        self.segments.len() == 1
    }

    /// The final segment, the one the caller reads/writes/invokes.
    pub fn last(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }

    pub fn full(&self) -> String {
        self.segments.join(".")
    }
}
