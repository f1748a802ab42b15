mod cases;
mod eval;
mod info;

pub use cases::{get_case_by_name_handler, get_cases_handler};
pub use eval::{EvalRequest, post_eval_handler};
pub use info::get_info_handler;

use actix_web::error::{InternalError, JsonPayloadError, QueryPayloadError};
use actix_web::{HttpRequest, HttpResponse, web};
use serde::Serialize;

use crate::sandbox::IsolationEngine;

/// Instructions handed to every caller alongside results
pub const CONTRACT_TEXT: &str = "Your program MUST read the puzzle input from a local file path './input.txt' \
     and print ONLY the final answer to stdout. Stdin is NOT provided.";

/// Largest accepted submission, in characters
pub const MAX_CODE_CHARS: usize = 10_000_000;
/// Captured stdout returned to the caller is cut to this many characters
pub const MAX_OUTPUT_CHARS: usize = 4000;
/// Captured stderr returned to the caller is cut to this many characters
pub const MAX_STDERR_CHARS: usize = 4000;

// Worst case UTF-8 size of the largest submission, plus room for the envelope
const MAX_BODY_BYTES: usize = MAX_CODE_CHARS * 4 + 64 * 1024;

#[derive(Serialize)]
struct ErrorResponse {
    reason: &'static str,
    code: u32,
}

#[derive(Serialize)]
struct ErrorResponseWithMessage {
    reason: &'static str,
    code: u32,
    message: String,
}

fn not_found(message: String) -> HttpResponse {
    HttpResponse::NotFound().json(ErrorResponseWithMessage {
        reason: "ERR_NOT_FOUND",
        code: 3,
        message,
    })
}

fn invalid_argument(message: String) -> HttpResponse {
    HttpResponse::BadRequest().json(ErrorResponseWithMessage {
        reason: "ERR_INVALID_ARGUMENT",
        code: 1,
        message,
    })
}

pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let response = HttpResponse::BadRequest().json(ErrorResponse {
        reason: "ERR_INVALID_ARGUMENT",
        code: 1,
    });
    InternalError::from_response(err, response).into()
}

pub fn query_error_handler(err: QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let response = HttpResponse::BadRequest().json(ErrorResponse {
        reason: "ERR_INVALID_ARGUMENT",
        code: 1,
    });
    InternalError::from_response(err, response).into()
}

/// Registers every route and the payload error handlers
pub fn configure<E: IsolationEngine>(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .limit(MAX_BODY_BYTES)
            .error_handler(json_error_handler),
    )
    .app_data(web::QueryConfig::default().error_handler(query_error_handler))
    .service(web::resource("/info").route(web::get().to(get_info_handler::<E>)))
    .service(web::resource("/cases").route(web::get().to(get_cases_handler)))
    .service(web::resource("/cases/{name}").route(web::get().to(get_case_by_name_handler)))
    .service(web::resource("/eval").route(web::post().to(post_eval_handler::<E>)));
}
