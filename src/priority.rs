use std::collections::BTreeSet;

/// Weights for the curated-list priority tags. `nfNN` frequency bands are
/// handled by [`frequency_band_weight`].
const PRIORITY_WEIGHTS: &[(&str, i64)] = &[
    ("news1", 20),
    ("news2", 10),
    ("ichi1", 20),
    ("ichi2", 10),
    ("spec1", 15),
    ("spec2", 5),
    ("gai1", 10),
    ("gai2", 5),
];

const FREQUENCY_BANDS: u32 = 48;

/// Sums the weights of the distinct tags. Unknown tags weigh nothing.
pub fn score<I, S>(tags: I) -> i64
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let tags: BTreeSet<String> = tags.into_iter().map(|tag| tag.as_ref().to_string()).collect();
    tags.iter().map(|tag| weight(tag)).sum()
}

pub fn weight(tag: &str) -> i64 {
    PRIORITY_WEIGHTS
        .iter()
        .find(|(known, _)| *known == tag)
        .map(|(_, weight)| *weight)
        .or_else(|| frequency_band_weight(tag))
        .unwrap_or(0)
}

/// `nf01` (most frequent) weighs 24, `nf48` weighs 1.
fn frequency_band_weight(tag: &str) -> Option<i64> {
    let digits = tag.strip_prefix("nf")?;
    if digits.len() != 2 {
        return None;
    }

    let band = digits.parse::<u32>().ok()?;
    if !(1..=FREQUENCY_BANDS).contains(&band) {
        return None;
    }

    Some(i64::from(FREQUENCY_BANDS + 2 - band) / 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_unknown_tags_score_zero() {
        assert_eq!(score(Vec::<String>::new()), 0);
        assert_eq!(score(["unknown-tag"]), 0);
        assert_eq!(score(["nf00", "nf49", "nf1", "nfxx"]), 0);
    }

    #[test]
    fn known_tags_are_summed() {
        assert_eq!(score(["news1"]), 20);
        assert_eq!(score(["news1", "ichi1", "nf01"]), 20 + 20 + 24);
    }

    #[test]
    fn frequency_bands_descend() {
        assert_eq!(weight("nf01"), 24);
        assert_eq!(weight("nf02"), 24);
        assert_eq!(weight("nf03"), 23);
        assert_eq!(weight("nf48"), 1);
        assert!(weight("nf10") > weight("nf30"));
    }

    #[test]
    fn score_ignores_order_and_duplicates() {
        let forward = score(["news2", "spec1", "gai2"]);
        let backward = score(["gai2", "spec1", "news2"]);
        let repeated = score(["gai2", "spec1", "news2", "spec1"]);

        assert_eq!(forward, 30);
        assert_eq!(forward, backward);
        assert_eq!(forward, repeated);
    }
}
