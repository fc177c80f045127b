/// Opaque file content.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Blob {
    pub data: Vec<u8>,
}

impl Blob {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn parse(content: &[u8]) -> Self {
        Self {
            data: content.to_vec(),
        }
    }

    /// True when the first 8000 bytes contain a NUL.
    pub fn looks_binary(&self) -> bool {
        self.data.iter().take(8000).any(|&b| b == 0)
    }
}
