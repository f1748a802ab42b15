use std::collections::BTreeMap;

use actix_web::{HttpResponse, Responder, web};
use serde::Serialize;

use super::CONTRACT_TEXT;
use crate::cases::CaseRepository;
use crate::config::ServerConfig;
use crate::sandbox::{IsolationEngine, Runner};

#[derive(Serialize)]
struct LanguageInfo<'a> {
    image: &'a str,
    code_filename: &'a str,
    build: bool,
    libraries: &'a [String],
}

#[derive(Serialize)]
struct InfoResponse<'a> {
    ok: bool,
    cases: usize,
    server: &'a str,
    timeout_ms: u64,
    languages: BTreeMap<&'a str, LanguageInfo<'a>>,
    agent_instructions: &'static str,
}

pub async fn get_info_handler<E: IsolationEngine>(
    server: web::Data<ServerConfig>,
    cases: web::Data<CaseRepository>,
    runner: web::Data<Runner<E>>,
) -> impl Responder {
    let languages = runner
        .table()
        .profiles()
        .map(|p| {
            (
                p.name.as_str(),
                LanguageInfo {
                    image: &p.image,
                    code_filename: &p.file_name,
                    build: p.needs_build_wrapper(),
                    libraries: &p.libraries,
                },
            )
        })
        .collect();

    HttpResponse::Ok().json(InfoResponse {
        ok: true,
        cases: cases.len(),
        server: &server.name,
        timeout_ms: runner.config().timeout.0,
        languages,
        agent_instructions: CONTRACT_TEXT,
    })
}
