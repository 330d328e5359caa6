//! Browser fingerprint pool for the HTTP and headless tiers (§4.2.1, §4.2.3).
//!
//! The teacher hardcodes a single fixed user-agent constant; this
//! generalizes it to a small pool of realistic
//! desktop fingerprints (User-Agent + matching Accept-Language/Encoding +
//! Sec-* client hints) so the HTTP tier can present as a different browser
//! per request instead of a single fixed string.

use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct Fingerprint {
    pub user_agent: &'static str,
    pub accept_language: &'static str,
    pub sec_ch_ua: &'static str,
    pub sec_ch_ua_platform: &'static str,
    pub viewport: (u32, u32),
}

const POOL: &[Fingerprint] = &[
    Fingerprint {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        accept_language: "en-US,en;q=0.9",
        sec_ch_ua: "\"Chromium\";v=\"124\", \"Google Chrome\";v=\"124\", \"Not-A.Brand\";v=\"99\"",
        sec_ch_ua_platform: "\"Windows\"",
        viewport: (1920, 1080),
    },
    Fingerprint {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
        accept_language: "en-US,en;q=0.8",
        sec_ch_ua: "\"Not/A)Brand\";v=\"8\", \"Chromium\";v=\"126\"",
        sec_ch_ua_platform: "\"macOS\"",
        viewport: (1440, 900),
    },
    Fingerprint {
        user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        accept_language: "en-GB,en;q=0.9",
        sec_ch_ua: "\"Chromium\";v=\"123\", \"Not:A-Brand\";v=\"8\"",
        sec_ch_ua_platform: "\"Linux\"",
        viewport: (1366, 768),
    },
    Fingerprint {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
        accept_language: "en-US,en;q=0.5",
        sec_ch_ua: "",
        sec_ch_ua_platform: "\"Windows\"",
        viewport: (1536, 864),
    },
];

#[must_use]
pub fn random_fingerprint() -> Fingerprint {
    let idx = rand::rng().random_range(0..POOL.len());
    POOL[idx]
}

/// Base 1920x1080 +/- jitter (§4.2.3).
#[must_use]
pub fn jittered_viewport(base: (u32, u32)) -> (u32, u32) {
    let mut rng = rand::rng();
    let dw: i32 = rng.random_range(-40..=40);
    let dh: i32 = rng.random_range(-30..=30);
    (
        (base.0 as i32 + dw).max(640) as u32,
        (base.1 as i32 + dh).max(480) as u32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_is_non_empty_and_fingerprints_are_well_formed() {
        for _ in 0..20 {
            let fp = random_fingerprint();
            assert!(fp.user_agent.contains("Mozilla"));
            assert!(!fp.accept_language.is_empty());
        }
    }

    #[test]
    fn jittered_viewport_stays_near_base() {
        let (w, h) = jittered_viewport((1920, 1080));
        assert!((1880..=1960).contains(&w));
        assert!((1050..=1110).contains(&h));
    }
}
