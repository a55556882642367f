use axum::http::StatusCode;
use chrono::Utc;
use user_service::{
    auth::{AccessClaims, JwtService, RefreshClaims, TokenError, TokenHelper},
    error::ApiError,
};

const SECRET: &str = "auth-tests-secret";

/// Well past the default validation leeway.
fn long_ago() -> usize {
    (Utc::now().timestamp() - 600) as usize
}

#[test]
fn test_access_token_round_trip() {
    let tokens = TokenHelper::new(SECRET);
    let token = tokens.access_token(7).unwrap();

    let claims: AccessClaims = tokens.decode(&token).unwrap();
    assert_eq!(claims.user_id, 7);
    assert!(claims.exp > Utc::now().timestamp() as usize);
}

#[test]
fn test_foreign_signature_is_decode_error() {
    let token = TokenHelper::new("someone-else").access_token(7).unwrap();

    let result = TokenHelper::new(SECRET).decode::<AccessClaims>(&token);
    assert!(matches!(result, Err(TokenError::Decode)));
}

#[test]
fn test_expired_token_is_rejected_but_decodes_when_allowed() {
    let tokens = TokenHelper::new(SECRET);
    let token = tokens
        .encode(&AccessClaims {
            user_id: 3,
            exp: long_ago(),
        })
        .unwrap();

    assert!(matches!(tokens.decode::<AccessClaims>(&token), Err(TokenError::Expired)));
    assert_eq!(tokens.decode_expired::<AccessClaims>(&token).unwrap().user_id, 3);
}

#[test]
fn test_verify_token() {
    let tokens = TokenHelper::new(SECRET);
    let jwt = JwtService::new(tokens.clone());

    assert!(jwt.verify_token(&tokens.access_token(1).unwrap()).is_ok());
    assert!(matches!(jwt.verify_token("not-a-jwt"), Err(TokenError::Decode)));
}

#[test]
fn test_refresh_issues_pair_for_expired_access_token() {
    let tokens = TokenHelper::new(SECRET);
    let jwt = JwtService::new(tokens.clone());
    let expired = tokens
        .encode(&AccessClaims {
            user_id: 11,
            exp: long_ago(),
        })
        .unwrap();
    let refresh = tokens.refresh_token().unwrap();

    let pair = jwt.create_refresh_token(&expired, &refresh).unwrap();

    let claims: AccessClaims = tokens.decode(&pair.token).unwrap();
    assert_eq!(claims.user_id, 11);
    let refresh_claims: RefreshClaims = tokens.decode(&pair.refresh_token).unwrap();
    assert_eq!(refresh_claims.sub, "refresh");
}

#[test]
fn test_refresh_rejects_expired_refresh_token() {
    let tokens = TokenHelper::new(SECRET);
    let jwt = JwtService::new(tokens.clone());
    let access = tokens.access_token(11).unwrap();
    let stale_refresh = tokens
        .encode(&RefreshClaims {
            sub: "refresh".to_string(),
            exp: long_ago(),
        })
        .unwrap();

    assert!(matches!(
        jwt.create_refresh_token(&access, &stale_refresh),
        Err(TokenError::Expired)
    ));
}

#[test]
fn test_refresh_rejects_access_token_in_refresh_slot() {
    let tokens = TokenHelper::new(SECRET);
    let jwt = JwtService::new(tokens.clone());
    let access = tokens.access_token(11).unwrap();

    assert!(matches!(
        jwt.create_refresh_token(&access, &access),
        Err(TokenError::Decode)
    ));
}

#[test]
fn test_token_errors_map_to_api_codes() {
    let decode: ApiError = TokenError::Decode.into();
    assert_eq!(decode.status, StatusCode::BAD_REQUEST);
    assert_eq!(decode.error_code, "TOKEN__DECODE_ERROR");

    let expired: ApiError = TokenError::Expired.into();
    assert_eq!(expired.status, StatusCode::BAD_REQUEST);
    assert_eq!(expired.error_code, "TOKEN__EXPIRE_TOKEN");
}
