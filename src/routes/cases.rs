use actix_web::{HttpResponse, Responder, web};
use serde::Serialize;

use super::{CONTRACT_TEXT, not_found};
use crate::cases::{CaseFilter, CaseRepository, CaseSummary};

#[derive(Serialize)]
struct CaseListResponse {
    items: Vec<CaseSummary>,
    total: usize,
    agent_instructions: &'static str,
}

/// Case metadata without its input or answer
#[derive(Serialize)]
struct CaseDetailResponse<'a> {
    name: &'a str,
    year: u32,
    day: u32,
    part: u32,
    task: &'a str,
    agent_instructions: &'static str,
}

pub async fn get_cases_handler(
    cases: web::Data<CaseRepository>,
    query: web::Query<CaseFilter>,
) -> impl Responder {
    let items = cases.list(&query);
    log::info!("Listed {} cases", items.len());

    HttpResponse::Ok().json(CaseListResponse {
        total: items.len(),
        items,
        agent_instructions: CONTRACT_TEXT,
    })
}

pub async fn get_case_by_name_handler(
    cases: web::Data<CaseRepository>,
    path: web::Path<(String,)>,
) -> impl Responder {
    let name = path.into_inner().0;

    match cases.get(&name) {
        Some(case) => HttpResponse::Ok().json(CaseDetailResponse {
            name: &case.name,
            year: case.year,
            day: case.day,
            part: case.part,
            task: &case.task,
            agent_instructions: CONTRACT_TEXT,
        }),
        None => {
            log::info!("Got nothing with case name {name}");
            not_found(format!("case not found: {name}"))
        }
    }
}
