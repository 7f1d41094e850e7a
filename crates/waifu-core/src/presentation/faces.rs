use std::collections::{BTreeMap, HashMap};

/// Expression name to face glyph. Lookups ignore case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Faces {
    glyphs: HashMap<String, String>,
}

impl Default for Faces {
    fn default() -> Self {
        Self::from_pairs([
            ("neutral", "('_')"),
            ("joy", "(^_^)"),
            ("angry", "(#｀Д´)"),
            ("sorrow", "(; ;)"),
            ("fun", "(*^_^*)"),
        ])
    }
}

impl Faces {
    pub fn from_map(map: &BTreeMap<String, String>) -> Self {
        Self::from_pairs(map.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            glyphs: pairs
                .into_iter()
                .map(|(name, glyph)| (name.to_lowercase(), glyph.to_string()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.glyphs.get(&name.to_lowercase()).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_faces_case_insensitive() {
        let faces = Faces::default();
        assert_eq!(faces.get("joy"), Some("(^_^)"));
        assert_eq!(faces.get("Sorrow"), Some("(; ;)"));
        assert_eq!(faces.get("surprised"), None);
    }
}
