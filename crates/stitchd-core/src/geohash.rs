//! Categorical encoding of geohashes.
//!
//! The vocabulary is fixed at startup. Codes are positions in the sorted,
//! de-duplicated vocabulary, so the same set of geohashes always yields the
//! same codes regardless of the order they were supplied in.

use crate::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeohashEncoder {
    classes: Vec<String>,
}

impl GeohashEncoder {
    pub fn new<I, S>(vocabulary: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut classes: Vec<String> = vocabulary.into_iter().map(Into::into).collect();
        classes.sort_unstable();
        classes.dedup();
        Self { classes }
    }

    /// # Errors
    ///
    /// Returns [`Error::UnknownGeohash`] if `geohash` was not in the
    /// vocabulary.
    pub fn encode(&self, geohash: &str) -> Result<usize> {
        self.classes
            .binary_search_by(|class| class.as_str().cmp(geohash))
            .map_err(|_| Error::UnknownGeohash {
                geohash: geohash.to_string(),
            })
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_sorted_order() {
        let encoder = GeohashEncoder::new(["9q6qr", "9q6qp", "9q6qq", "9q6qp"]);
        assert_eq!(encoder.encode("9q6qp").unwrap(), 0);
        assert_eq!(encoder.encode("9q6qq").unwrap(), 1);
        assert_eq!(encoder.encode("9q6qr").unwrap(), 2);
        assert!(encoder.encode("9q6qs").is_err());
    }

    #[test]
    fn unknown_geohash_is_rejected() {
        let encoder = GeohashEncoder::new(["9q6qp"]);
        match encoder.encode("dr5ru") {
            Err(Error::UnknownGeohash { geohash }) => assert_eq!(geohash, "dr5ru"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
