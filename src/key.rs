use crate::data::{DictionaryEntryRef, FavoriteRow};
use serde::{Deserialize, Serialize};
use std::fmt;

const KEY_SEPARATOR: &str = "::";

/// Normalized `(headword, canonical_pos)` identity of a favorite.
///
/// Used both as the pending-lock key and as the cache lookup key, so two
/// senses of the same headword and part of speech always collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FavoriteWordKey(String);

impl FavoriteWordKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FavoriteWordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Anything a favorite key can be derived from.
pub trait FavoriteKeySource {
    fn favorite_key(&self) -> FavoriteWordKey;
}

impl FavoriteKeySource for FavoriteWordKey {
    fn favorite_key(&self) -> FavoriteWordKey {
        self.clone()
    }
}

/// Strings are treated as already-built keys and returned unchanged.
impl FavoriteKeySource for str {
    fn favorite_key(&self) -> FavoriteWordKey {
        FavoriteWordKey(self.to_string())
    }
}

impl FavoriteKeySource for String {
    fn favorite_key(&self) -> FavoriteWordKey {
        self.as_str().favorite_key()
    }
}

impl FavoriteKeySource for DictionaryEntryRef {
    fn favorite_key(&self) -> FavoriteWordKey {
        key_for(&self.headword, &self.canonical_pos)
    }
}

impl FavoriteKeySource for FavoriteRow {
    fn favorite_key(&self) -> FavoriteWordKey {
        key_for(&self.headword, &self.canonical_pos)
    }
}

pub fn build_key<S: FavoriteKeySource + ?Sized>(source: &S) -> FavoriteWordKey {
    source.favorite_key()
}

pub fn key_for(headword: &str, canonical_pos: &str) -> FavoriteWordKey {
    let headword = normalize(headword);
    let canonical_pos = normalize(canonical_pos);
    let mut key = String::with_capacity(headword.len() + KEY_SEPARATOR.len() + canonical_pos.len());
    key.push_str(&headword);
    key.push_str(KEY_SEPARATOR);
    key.push_str(&canonical_pos);
    FavoriteWordKey(key)
}

pub fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}
