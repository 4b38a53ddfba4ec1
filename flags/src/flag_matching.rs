/// Deterministic visitor bucketing.
///
/// The hash must stay bit-for-bit compatible with the JavaScript reference
/// (`hash = (hash << 5) - hash + charCodeAt(i)`, truncated to a signed
/// 32-bit integer at every step), so that a visitor keeps the same bucket
/// across reimplementations sharing the same visitor base.
#[derive(Debug)]
pub struct FlagMatcher {
    pub visitor_id: String,
}

impl FlagMatcher {
    pub fn new(visitor_id: impl Into<String>) -> Self {
        FlagMatcher {
            visitor_id: visitor_id.into(),
        }
    }

    /// Maps the visitor id onto a stable bucket in `0..100`.
    ///
    /// Iterates UTF-16 code units because that is what `charCodeAt` yields;
    /// using Unicode scalar values would diverge on ids outside the BMP.
    pub fn bucket(&self) -> u32 {
        let mut hash: i32 = 0;
        for unit in self.visitor_id.encode_utf16() {
            hash = (hash << 5).wrapping_sub(hash).wrapping_add(i32::from(unit));
        }
        hash.unsigned_abs() % 100
    }

    /// `chance` is an integer percentage: 0 never matches, 100 always does.
    pub fn matches_chance(&self, chance: u8) -> bool {
        self.bucket() < u32::from(chance)
    }
}
