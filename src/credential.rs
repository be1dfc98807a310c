use actix_web::cookie::{time::Duration, Cookie, SameSite};
use actix_web::HttpRequest;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::models::Id;

const TOKEN_BYTES: usize = 32;

/// Mint a fresh ownership token. The store binds it to exactly one comment.
pub fn issue() -> String {
    let mut buf = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Cookie name scoped to one comment of one thread. Thread keys contain
/// characters cookies can't carry, so only a digest prefix is used.
pub fn cookie_name(thread: &str, id: Id) -> String {
    let digest = Sha256::digest(thread.as_bytes());
    format!("c-{}-{id}", &hex::encode(digest)[..16])
}

pub fn ownership_cookie(thread: &str, id: Id, token: &str, max_age: Duration) -> Cookie<'static> {
    Cookie::build(cookie_name(thread, id), token.to_owned())
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(max_age)
        .finish()
}

/// Tells the client to drop the cookie once the comment can no longer be edited.
pub fn expired_cookie(thread: &str, id: Id) -> Cookie<'static> {
    let mut cookie = Cookie::build(cookie_name(thread, id), "").path("/").finish();
    cookie.make_removal();
    cookie
}

/// Token the client echoed back for this comment, if any.
pub fn presented(req: &HttpRequest, thread: &str, id: Id) -> Option<String> {
    req.cookie(&cookie_name(thread, id)).map(|c| c.value().to_owned())
}

/// Constant-time comparison of the stored token with the presented one.
pub fn validate(expected: &str, presented: &str) -> bool {
    let (a, b) = (expected.as_bytes(), presented.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn tokens_are_unique_hex() {
        let a = issue();
        let b = issue();
        assert_eq!(a.len(), TOKEN_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn validate_requires_exact_match() {
        let t = issue();
        assert!(validate(&t, &t));
        assert!(!validate(&t, &issue()));
        assert!(!validate(&t, &t[..10]));
        assert!(!validate(&t, ""));
    }

    #[test]
    fn cookie_names_differ_per_thread_and_id() {
        assert_ne!(cookie_name("/a", 1), cookie_name("/b", 1));
        assert_ne!(cookie_name("/a", 1), cookie_name("/a", 2));
        assert!(cookie_name("/a", 7).ends_with("-7"));
    }

    #[test]
    fn presented_reads_the_matching_cookie() {
        let token = issue();
        let c = ownership_cookie("/a", 3, &token, Duration::seconds(60));
        assert_eq!(c.max_age(), Some(Duration::seconds(60)));
        let req = TestRequest::default().cookie(c).to_http_request();
        assert_eq!(presented(&req, "/a", 3).as_deref(), Some(token.as_str()));
        assert!(presented(&req, "/a", 4).is_none());
    }
}
