//! Anti-automation interstitial detection.

use reqwest::header::HeaderMap;

/// Header some edge networks set on challenge responses.
const MITIGATED_HEADER: &str = "cf-mitigated";

/// Returns the marker that identifies `body`/`headers` as a bot challenge,
/// or `None` for an ordinary response.
pub(crate) fn challenge_marker(headers: &HeaderMap, body: &str) -> Option<&'static str> {
    if headers
        .get(MITIGATED_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("challenge"))
    {
        return Some("cf-mitigated: challenge");
    }

    let lowered = body.to_ascii_lowercase();
    if lowered.contains("attention required! | cloudflare") {
        return Some("cloudflare banner");
    }
    if lowered.contains("/cdn-cgi/challenge-platform/") {
        return Some("challenge platform");
    }
    let just_a_moment = lowered.contains("just a moment...");
    if just_a_moment && (lowered.contains("please enable cookies") || lowered.contains("cf-chl-")) {
        return Some("just a moment");
    }
    if lowered.contains("captcha") {
        return Some("captcha");
    }
    if lowered.contains("access denied") {
        return Some("access denied");
    }
    None
}
