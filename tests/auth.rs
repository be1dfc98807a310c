use actix_web::{dev::Payload, test, FromRequest};
use marginalia::auth::{create_jwt, is_configured, Auth, AuthError, Claims, Role};
use serial_test::serial;
use std::env;

// Helper that guarantees a sufficiently long secret for tests.
fn set_secret() {
    env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
}

#[actix_web::test]
#[serial]
async fn jwt_roundtrip_ok() {
    set_secret();
    let token = create_jwt("mod:42", vec![Role::Moderator]).expect("token");
    let req = test::TestRequest::default()
        .insert_header(("Authorization", format!("Bearer {}", token)))
        .to_http_request();
    let mut pl = Payload::None;
    let auth = Auth::from_request(&req, &mut pl).await.expect("extract");
    assert_eq!(auth.0.sub, "mod:42");
    assert!(auth.is_privileged());
}

#[actix_web::test]
#[serial]
async fn extractor_rejects_invalid_token() {
    set_secret();
    let req = test::TestRequest::default()
        .insert_header(("Authorization", "Bearer notatoken"))
        .to_http_request();
    let mut pl = Payload::None;
    assert!(Auth::from_request(&req, &mut pl).await.is_err());
}

#[actix_web::test]
#[serial]
async fn extractor_requires_a_header() {
    set_secret();
    let req = test::TestRequest::default().to_http_request();
    let mut pl = Payload::None;
    assert!(Auth::from_request(&req, &mut pl).await.is_err());
}

#[actix_web::test]
#[serial]
async fn token_signed_with_another_secret_is_rejected() {
    env::set_var("JWT_SECRET", "another-secret-that-is-long-enough!!");
    let token = create_jwt("admin:1", vec![Role::Admin]).unwrap();
    set_secret();
    let req = test::TestRequest::default()
        .insert_header(("Authorization", format!("Bearer {token}")))
        .to_http_request();
    let mut pl = Payload::None;
    assert!(Auth::from_request(&req, &mut pl).await.is_err());
}

#[::core::prelude::v1::test]
#[serial]
fn short_or_missing_secret_disables_tokens() {
    env::set_var("JWT_SECRET", "too-short");
    assert!(!is_configured());
    assert!(matches!(create_jwt("x", vec![Role::Admin]), Err(AuthError::NotConfigured)));
    env::remove_var("JWT_SECRET");
    assert!(!is_configured());
    set_secret();
    assert!(is_configured());
}

#[::core::prelude::v1::test]
fn only_moderators_and_admins_are_privileged() {
    let claims = |roles| Auth(Claims { sub: "s".into(), exp: usize::MAX, roles });
    assert!(claims(vec![Role::Admin]).is_privileged());
    assert!(claims(vec![Role::User, Role::Moderator]).is_privileged());
    assert!(!claims(vec![Role::User]).is_privileged());
    assert!(!claims(vec![]).is_privileged());
}
