//! Identifier schemes
//!
//! An identifier is the cache key root of a retrieved item. Two schemes are
//! provided:
//!
//! - [`BucketedIds`]: `<reversed domain>_<path hash>_<bucket start>`. The
//!   bucket suffix changes once every `hours`, so a page maps to a fresh
//!   identifier (and a fresh cache entry) when its bucket expires. This is
//!   the only notion of staleness in the cache.
//! - [`DateIds`]: `YYYYMMDD` for sites publishing one page per day. Fully
//!   reversible.

use chrono::{DateTime, Days, Duration, NaiveDate, Utc};
use sha2::{Digest, Sha256};
use url::{Position, Url};

/// Start of the first bucket, 2025-01-01T00:00:00Z
const BUCKET_EPOCH_SECS: i64 = 1_735_689_600;

/// Length of the hex path hash in bucketed identifiers
const PATH_HASH_LEN: usize = 8;

/// Inputs starting with `http` are URLs; everything else is an identifier
pub fn looks_like_url(input: &str) -> bool {
    input.starts_with("http")
}

/// Fixed-width time bucket counted from [`BUCKET_EPOCH_SECS`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBucket {
    hours: i64,
}

impl TimeBucket {
    /// Bucket of `hours` width; `None` for zero
    pub fn new(hours: u32) -> Option<Self> {
        (hours > 0).then_some(Self {
            hours: i64::from(hours),
        })
    }

    /// Width in hours
    pub fn hours(&self) -> i64 {
        self.hours
    }

    /// Start of the bucket containing `now`
    pub fn start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let elapsed_hours = (now.timestamp() - BUCKET_EPOCH_SECS).div_euclid(3600);
        let start_hours = elapsed_hours.div_euclid(self.hours) * self.hours;
        DateTime::<Utc>::UNIX_EPOCH
            + Duration::seconds(BUCKET_EPOCH_SECS)
            + Duration::hours(start_hours)
    }

    /// `YYYYMMDDHH` tag of the bucket containing `now`
    pub fn tag(&self, now: DateTime<Utc>) -> String {
        self.start(now).format("%Y%m%d%H").to_string()
    }
}

/// Host with a leading `www` and trailing `com` dropped, reversed, joined by `_`
///
/// `news.example.com` becomes `example_news`, `www.bbc.co.uk` becomes
/// `uk_co_bbc`.
pub fn reversed_domain(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    let mut parts: Vec<&str> = host.split('.').filter(|p| !p.is_empty()).collect();
    if parts.len() > 1 && parts[0] == "www" {
        parts.remove(0);
    }
    if parts.len() > 1 && parts.last() == Some(&"com") {
        parts.pop();
    }
    if parts.is_empty() {
        return None;
    }
    parts.reverse();
    Some(parts.join("_"))
}

/// First hex digits of the SHA-256 of everything after the host
pub fn path_hash(url: &Url) -> String {
    let path = url[Position::BeforePath..].trim_start_matches('/');
    let digest = Sha256::digest(path.as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(PATH_HASH_LEN);
    hash
}

/// Time-bucketed identifiers for arbitrary pages
///
/// Not reversible: a bare identifier only resolves through a cached
/// metadata record.
#[derive(Debug, Clone, Copy)]
pub struct BucketedIds {
    bucket: TimeBucket,
}

impl BucketedIds {
    pub fn new(bucket: TimeBucket) -> Self {
        Self { bucket }
    }

    pub fn bucket(&self) -> TimeBucket {
        self.bucket
    }

    /// Identifier of `url` at time `now`
    pub fn url_to_id(&self, url: &str, now: DateTime<Utc>) -> Result<String, String> {
        let parsed = Url::parse(url).map_err(|e| format!("invalid URL: {e}"))?;
        let domain = reversed_domain(&parsed).ok_or_else(|| "URL has no host".to_string())?;
        Ok(format!(
            "{domain}_{}_{}",
            path_hash(&parsed),
            self.bucket.tag(now)
        ))
    }
}

/// `YYYYMMDD` identifiers under a fixed base URL
#[derive(Debug, Clone)]
pub struct DateIds {
    base_url: String,
}

impl DateIds {
    /// `base_url` is normalized to end with `/`
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self { base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Parse a `YYYYMMDD` identifier
    pub fn parse_date(id: &str) -> Option<NaiveDate> {
        if id.len() != 8 || !id.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        NaiveDate::parse_from_str(id, "%Y%m%d").ok()
    }

    /// Format a date as an identifier
    pub fn date_to_id(date: NaiveDate) -> String {
        date.format("%Y%m%d").to_string()
    }

    /// Identifier from the last path segment of `url`
    pub fn url_to_id(&self, url: &str) -> Result<String, String> {
        let rest = url
            .strip_prefix(&self.base_url)
            .ok_or_else(|| format!("expected URL under {}", self.base_url))?;
        let id = rest
            .split('/')
            .filter(|s| !s.is_empty())
            .next_back()
            .ok_or_else(|| "URL has no date segment".to_string())?;
        Self::parse_date(id)
            .map(|_| id.to_string())
            .ok_or_else(|| format!("expected YYYYMMDD, got '{id}'"))
    }

    /// URL of a `YYYYMMDD` identifier
    pub fn id_to_url(&self, id: &str) -> Option<String> {
        Self::parse_date(id).map(|_| format!("{}{id}/", self.base_url))
    }

    /// `n` identifiers ending at `end`, newest first
    pub fn recent(end: NaiveDate, n: usize) -> Vec<String> {
        (0..n as u64)
            .map_while(|back| end.checked_sub_days(Days::new(back)))
            .map(Self::date_to_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_looks_like_url() {
        assert!(looks_like_url("https://example.com"));
        assert!(looks_like_url("http://example.com"));
        assert!(!looks_like_url("20250301"));
        assert!(!looks_like_url("example_1a2b3c4d_2025010100"));
    }

    #[test]
    fn test_bucket_tag() {
        let week = TimeBucket::new(24 * 7).unwrap();
        assert_eq!(week.tag(at(2025, 1, 1, 0)), "2025010100");
        assert_eq!(week.tag(at(2025, 1, 7, 23)), "2025010100");
        assert_eq!(week.tag(at(2025, 1, 8, 0)), "2025010800");

        let hourly = TimeBucket::new(1).unwrap();
        assert_eq!(hourly.tag(at(2025, 3, 1, 13)), "2025030113");

        assert!(TimeBucket::new(0).is_none());
    }

    #[test]
    fn test_bucket_before_epoch() {
        let day = TimeBucket::new(24).unwrap();
        assert_eq!(day.tag(at(2024, 12, 31, 5)), "2024123100");
    }

    #[test]
    fn test_reversed_domain() {
        let d = |u: &str| reversed_domain(&Url::parse(u).unwrap());
        assert_eq!(d("https://www.example.com/a").as_deref(), Some("example"));
        assert_eq!(d("https://news.ycombinator.com/").as_deref(), Some("ycombinator_news"));
        assert_eq!(d("https://www.bbc.co.uk/news").as_deref(), Some("uk_co_bbc"));
        assert_eq!(d("http://127.0.0.1:8080/").as_deref(), Some("1_0_0_127"));
    }

    #[test]
    fn test_path_hash_ignores_scheme_and_host() {
        let a = Url::parse("https://a.example.com/x/y?z=1").unwrap();
        let b = Url::parse("http://b.example.org/x/y?z=1").unwrap();
        let c = Url::parse("https://a.example.com/x/y?z=2").unwrap();
        assert_eq!(path_hash(&a), path_hash(&b));
        assert_ne!(path_hash(&a), path_hash(&c));
        assert_eq!(path_hash(&a).len(), PATH_HASH_LEN);
    }

    #[test]
    fn test_bucketed_same_bucket_same_id() {
        let ids = BucketedIds::new(TimeBucket::new(24).unwrap());
        let url = "https://www.example.com/post/1";
        let first = ids.url_to_id(url, at(2025, 3, 1, 1)).unwrap();
        let second = ids.url_to_id(url, at(2025, 3, 1, 23)).unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("example_"));
        assert!(first.ends_with("_2025030100"));
    }

    #[test]
    fn test_bucketed_next_bucket_new_id() {
        let ids = BucketedIds::new(TimeBucket::new(24).unwrap());
        let url = "https://www.example.com/post/1";
        let first = ids.url_to_id(url, at(2025, 3, 1, 23)).unwrap();
        let second = ids.url_to_id(url, at(2025, 3, 2, 0)).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_bucketed_rejects_bad_url() {
        let ids = BucketedIds::new(TimeBucket::new(1).unwrap());
        assert!(ids.url_to_id("http//broken", at(2025, 1, 1, 0)).is_err());
    }

    #[test]
    fn test_date_ids_roundtrip() {
        let ids = DateIds::new("https://news.example.com/daily");
        assert_eq!(ids.base_url(), "https://news.example.com/daily/");
        assert_eq!(
            ids.id_to_url("20250301").as_deref(),
            Some("https://news.example.com/daily/20250301/")
        );
        assert_eq!(
            ids.url_to_id("https://news.example.com/daily/20250301/").unwrap(),
            "20250301"
        );
        assert_eq!(
            ids.url_to_id("https://news.example.com/daily/20250301").unwrap(),
            "20250301"
        );
    }

    #[test]
    fn test_date_ids_reject() {
        let ids = DateIds::new("https://news.example.com/daily/");
        assert!(ids.id_to_url("2025031").is_none());
        assert!(ids.id_to_url("20251301").is_none());
        assert!(ids.id_to_url("abcdefgh").is_none());
        assert!(ids.url_to_id("https://other.example.com/20250301/").is_err());
        assert!(ids.url_to_id("https://news.example.com/daily/latest/").is_err());
    }

    #[test]
    fn test_recent_descending() {
        let end = NaiveDate::from_ymd_opt(2025, 3, 2).unwrap();
        assert_eq!(
            DateIds::recent(end, 4),
            vec!["20250302", "20250301", "20250228", "20250227"]
        );
        assert!(DateIds::recent(end, 0).is_empty());
    }
}
