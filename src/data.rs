use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a favorites category on the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryId(pub u64);

impl fmt::Display for CategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for CategoryId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(CategoryId)
    }
}

/// One meaning of a headword, reduced to the gloss shown to learners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sense {
    pub gloss: String,
}

impl Sense {
    pub fn new(gloss: impl Into<String>) -> Self {
        Self {
            gloss: gloss.into(),
        }
    }
}

/// Shapes a sense may arrive in from dictionary generation output.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSense {
    Text(String),
    Object { gloss: String },
}

impl RawSense {
    fn into_sense(self) -> Option<Sense> {
        let gloss = match self {
            RawSense::Text(gloss) | RawSense::Object { gloss } => gloss,
        };
        let trimmed = gloss.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Sense::new(trimmed))
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    headword: String,
    #[serde(alias = "canonicalPos", alias = "pos")]
    canonical_pos: String,
    #[serde(default, alias = "senseIndex")]
    sense_index: Option<u32>,
    #[serde(default)]
    senses: Option<Vec<RawSense>>,
}

/// A dictionary headword as the favorites engine sees it.
///
/// `senses` is always normalized: raw input may list senses as bare strings or
/// `{ "gloss": ... }` objects, and blank glosses are dropped at deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DictionaryEntryRef {
    pub headword: String,
    pub canonical_pos: String,
    pub sense_index: u32,
    pub senses: Vec<Sense>,
}

impl<'de> Deserialize<'de> for DictionaryEntryRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawEntry::deserialize(deserializer)?;
        Ok(Self {
            headword: raw.headword.trim().to_string(),
            canonical_pos: raw.canonical_pos.trim().to_string(),
            sense_index: raw.sense_index.unwrap_or(0),
            senses: raw
                .senses
                .unwrap_or_default()
                .into_iter()
                .filter_map(RawSense::into_sense)
                .collect(),
        })
    }
}

impl DictionaryEntryRef {
    pub fn new(headword: &str, canonical_pos: &str) -> Self {
        Self {
            headword: headword.trim().to_string(),
            canonical_pos: canonical_pos.trim().to_string(),
            sense_index: 0,
            senses: Vec::new(),
        }
    }

    pub fn with_senses<I, S>(mut self, glosses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.senses = glosses
            .into_iter()
            .filter_map(|gloss| {
                let trimmed = gloss.as_ref().trim();
                (!trimmed.is_empty()).then(|| Sense::new(trimmed))
            })
            .collect();
        self
    }

    /// Builds one ADD payload per sense, numbering senses by their position.
    ///
    /// An entry without senses yields a single payload with `sense_index = 0`
    /// and an empty gloss.
    pub fn add_payloads(
        &self,
        category_id: Option<CategoryId>,
        gloss_lang: &str,
    ) -> Vec<AddFavorite> {
        if self.senses.is_empty() {
            return vec![AddFavorite {
                headword: self.headword.clone(),
                canonical_pos: self.canonical_pos.clone(),
                sense_index: 0,
                gloss: String::new(),
                gloss_lang: gloss_lang.to_string(),
                category_id,
            }];
        }
        self.senses
            .iter()
            .enumerate()
            .map(|(index, sense)| AddFavorite {
                headword: self.headword.clone(),
                canonical_pos: self.canonical_pos.clone(),
                sense_index: index as u32,
                gloss: sense.gloss.clone(),
                gloss_lang: gloss_lang.to_string(),
                category_id,
            })
            .collect()
    }
}

/// A favorited sense row as stored remotely and mirrored in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoriteRow {
    pub headword: String,
    pub canonical_pos: String,
    pub sense_index: u32,
    #[serde(default)]
    pub gloss: String,
    #[serde(default)]
    pub gloss_lang: String,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    pub created_at: u64,
}

impl FavoriteRow {
    /// Minimal row inserted optimistically before the remote confirms an add.
    pub fn optimistic(entry: &DictionaryEntryRef, category_id: Option<CategoryId>) -> Self {
        Self {
            headword: entry.headword.clone(),
            canonical_pos: entry.canonical_pos.clone(),
            sense_index: 0,
            gloss: entry
                .senses
                .first()
                .map(|sense| sense.gloss.clone())
                .unwrap_or_default(),
            gloss_lang: String::new(),
            category_id,
            created_at: now_ts(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoritePage {
    pub items: Vec<FavoriteRow>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddFavorite {
    pub headword: String,
    pub canonical_pos: String,
    pub sense_index: u32,
    pub gloss: String,
    pub gloss_lang: String,
    pub category_id: Option<CategoryId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveFavorite {
    pub headword: String,
    pub canonical_pos: String,
    pub category_id: CategoryId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub order_index: u32,
}

pub(crate) fn now_ts() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn senses_accept_strings_and_objects() {
        let entry: DictionaryEntryRef = serde_json::from_str(
            r#"{"headword":" Haus ","canonicalPos":"Nomen","senses":["house",{"gloss":" home "},"  "]}"#,
        )
        .unwrap();
        assert_eq!(entry.headword, "Haus");
        assert_eq!(entry.sense_index, 0);
        assert_eq!(entry.senses, vec![Sense::new("house"), Sense::new("home")]);
    }

    #[test]
    fn senses_reject_unknown_shapes() {
        let result: Result<DictionaryEntryRef, _> = serde_json::from_str(
            r#"{"headword":"Haus","canonical_pos":"Nomen","senses":[42]}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn payloads_number_senses_by_position() {
        let entry = DictionaryEntryRef::new("Haus", "Nomen").with_senses(["house", "home"]);
        let payloads = entry.add_payloads(Some(CategoryId(7)), "en");
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0].sense_index, 0);
        assert_eq!(payloads[0].gloss, "house");
        assert_eq!(payloads[1].sense_index, 1);
        assert_eq!(payloads[1].gloss, "home");
        assert!(
            payloads
                .iter()
                .all(|p| p.category_id == Some(CategoryId(7)) && p.gloss_lang == "en")
        );
    }

    #[test]
    fn payloads_without_senses_use_index_zero() {
        let entry = DictionaryEntryRef::new("Haus", "Nomen");
        let payloads = entry.add_payloads(None, "en");
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].sense_index, 0);
        assert!(payloads[0].gloss.is_empty());
    }

    #[test]
    fn category_id_parses_trimmed() {
        assert_eq!(" 12 ".parse::<CategoryId>().unwrap(), CategoryId(12));
        assert!("x".parse::<CategoryId>().is_err());
    }
}
