use std::sync::Arc;
use tracing::warn;
use warp::{Filter, Rejection};

use super::rejection::Unauthorized;

/// Require `Authorization: Bearer <token>` with one of the configured tokens
pub fn bearer(tokens: Arc<Vec<String>>) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and_then(move |header: Option<String>| {
            let tokens = tokens.clone();
            async move {
                match header.as_deref().and_then(parse_bearer) {
                    Some(token) if tokens.iter().any(|known| known == token) => Ok(()),
                    Some(_) => {
                        warn!("rejected request with unknown bearer token");
                        Err(warp::reject::custom(Unauthorized))
                    }
                    None => {
                        warn!("rejected request without bearer token");
                        Err(warp::reject::custom(Unauthorized))
                    }
                }
            }
        })
        .untuple_one()
}

fn parse_bearer(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
