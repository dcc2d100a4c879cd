use bytes::Bytes;

/// A single value in a request parameter bag or a decoded response payload.
///
/// The wire format is heterogeneous, so everything that crosses the transport
/// boundary is expressed as this closed set of shapes and pattern-matched
/// exhaustively at the encoding and decoding points.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    Str(String),
    Int(i64),
    Bool(bool),
    Bytes(Bytes),
    List(Vec<WireValue>),
    Map(Vec<(String, WireValue)>),
}

impl WireValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            WireValue::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            WireValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            WireValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[WireValue]> {
        match self {
            WireValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(String, WireValue)]> {
        match self {
            WireValue::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Look up a key in a map value. Returns `None` for non-map values.
    pub fn field(&self, key: &str) -> Option<&WireValue> {
        self.as_map()
            .and_then(|entries| entries.iter().find(|(k, _)| k == key))
            .map(|(_, v)| v)
    }
}

impl From<&str> for WireValue {
    fn from(value: &str) -> Self {
        WireValue::Str(value.to_string())
    }
}

impl From<String> for WireValue {
    fn from(value: String) -> Self {
        WireValue::Str(value)
    }
}

impl From<i64> for WireValue {
    fn from(value: i64) -> Self {
        WireValue::Int(value)
    }
}

impl From<i32> for WireValue {
    fn from(value: i32) -> Self {
        WireValue::Int(value as i64)
    }
}

impl From<bool> for WireValue {
    fn from(value: bool) -> Self {
        WireValue::Bool(value)
    }
}

impl From<Bytes> for WireValue {
    fn from(value: Bytes) -> Self {
        WireValue::Bytes(value)
    }
}

impl From<Vec<WireValue>> for WireValue {
    fn from(value: Vec<WireValue>) -> Self {
        WireValue::List(value)
    }
}

impl From<Vec<(String, WireValue)>> for WireValue {
    fn from(value: Vec<(String, WireValue)>) -> Self {
        WireValue::Map(value)
    }
}

/// Insertion-ordered parameter collection for an outbound request.
///
/// Order is preserved because both the signature computation and the encoded
/// payload must be byte-for-byte deterministic for a given set of inserts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamBag {
    entries: Vec<(String, WireValue)>,
}

impl ParamBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a parameter. Re-inserting an existing key overwrites the value
    /// in place so the original position is kept.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<WireValue>) {
        let key = key.into();
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&WireValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, WireValue)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_value(&self) -> WireValue {
        WireValue::Map(self.entries.clone())
    }
}
