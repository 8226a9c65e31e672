//! Ordered entity key-values.
//!
//! Large maps carry hundreds of thousands of pairs and almost all of
//! them are short, so a pair whose key and value fit in 30 bytes is
//! stored inline without touching the heap.

const INLINE_CAPACITY: usize = 30;

#[derive(Clone)]
pub enum KeyValue {
    Inline {
        buf: [u8; INLINE_CAPACITY],
        key_len: u8,
        value_len: u8,
    },
    Spilled {
        key: String,
        value: String,
    },
}

impl KeyValue {
    pub fn new(key: &str, value: &str) -> Self {
        let key_bytes = key.as_bytes();
        let value_bytes = value.as_bytes();

        if key_bytes.len() + value_bytes.len() <= INLINE_CAPACITY {
            let mut buf = [0u8; INLINE_CAPACITY];
            buf[..key_bytes.len()].copy_from_slice(key_bytes);
            buf[key_bytes.len()..key_bytes.len() + value_bytes.len()]
                .copy_from_slice(value_bytes);

            Self::Inline {
                buf,
                key_len: key_bytes.len() as u8,
                value_len: value_bytes.len() as u8,
            }
        } else {
            Self::Spilled {
                key: key.to_owned(),
                value: value.to_owned(),
            }
        }
    }

    pub fn key(&self) -> &str {
        match self {
            // inline pairs are built from &str so the bytes stay valid utf8
            Self::Inline { buf, key_len, .. } => {
                std::str::from_utf8(&buf[..*key_len as usize]).unwrap()
            }
            Self::Spilled { key, .. } => key,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Self::Inline {
                buf,
                key_len,
                value_len,
            } => {
                let start = *key_len as usize;
                std::str::from_utf8(&buf[start..start + *value_len as usize]).unwrap()
            }
            Self::Spilled { value, .. } => value,
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, Self::Inline { .. })
    }
}

impl std::fmt::Debug for KeyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{}\" \"{}\"", self.key(), self.value())
    }
}

impl PartialEq for KeyValue {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key() && self.value() == other.value()
    }
}

/// Insertion-ordered key-value table. A duplicate key overwrites the
/// value in place, keeping the first occurrence's position, which is
/// what the entity-lump round trip relies on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyValues(Vec<KeyValue>);

impl KeyValues {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|kv| kv.key() == key)
            .map(|kv| kv.value())
    }

    pub fn set(&mut self, key: &str, value: &str) {
        match self.0.iter_mut().find(|kv| kv.key() == key) {
            Some(kv) => *kv = KeyValue::new(key, value),
            None => self.0.push(KeyValue::new(key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let at = self.0.iter().position(|kv| kv.key() == key)?;
        Some(self.0.remove(at).value().to_owned())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|kv| (kv.key(), kv.value()))
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for KeyValues {
    fn from_iter<T: IntoIterator<Item = (&'a str, &'a str)>>(iter: T) -> Self {
        let mut res = Self::new();
        for (key, value) in iter {
            res.set(key, value);
        }
        res
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn short_pair_stays_inline() {
        let kv = KeyValue::new("classname", "worldspawn");
        assert!(kv.is_inline());
        assert_eq!(kv.key(), "classname");
        assert_eq!(kv.value(), "worldspawn");
    }

    #[test]
    fn long_pair_spills() {
        let kv = KeyValue::new(
            "wad",
            "/home/user/map_compiler/halflife.wad;/home/user/map_compiler/devtextures.wad",
        );
        assert!(!kv.is_inline());
        assert!(kv.value().ends_with("devtextures.wad"));
    }

    #[test]
    fn duplicate_key_overwrites_in_place() {
        let mut kvs = KeyValues::new();
        kvs.set("classname", "info_null");
        kvs.set("origin", "0 0 0");
        kvs.set("classname", "light");

        assert_eq!(kvs.len(), 2);
        assert_eq!(kvs.get("classname"), Some("light"));
        assert_eq!(kvs.iter().next().unwrap().0, "classname");
    }
}
