use actix_web::{HttpResponse, Responder, web};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use super::{
    CONTRACT_TEXT, ErrorResponse, MAX_CODE_CHARS, MAX_OUTPUT_CHARS, MAX_STDERR_CHARS,
    invalid_argument, not_found,
};
use crate::cases::CaseRepository;
use crate::sandbox::{
    ExecutionMetrics, ExecutionResult, IsolationEngine, Runner, RunnerError,
    SYSTEM_ERROR_EXIT_CODE,
};

const HINT: &str =
    "Ensure your program reads from './input.txt' and prints only the final answer.";

#[derive(Serialize, Deserialize, Debug)]
pub struct EvalRequest {
    pub name: String,
    pub language: String,
    pub code: String,
}

#[derive(Serialize, Debug)]
struct EvalResponse {
    pass: bool,
    got: String,
    exit_code: i32,
    language: String,
    metrics: ExecutionMetrics,
    agent_instructions: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stderr: Option<String>,
}

impl EvalResponse {
    /// Compares the full trimmed output with the answer, then truncates for display
    fn judge(language: String, result: &ExecutionResult, answer: &str) -> Self {
        let stdout = result.stdout_lossy();
        let output = stdout.trim();
        let pass = !result.stdout_truncated && is_pass(result.exit_code, output, answer);

        Self {
            pass,
            got: truncate_chars(output, MAX_OUTPUT_CHARS).to_string(),
            exit_code: result.exit_code,
            language,
            metrics: result.metrics.clone(),
            agent_instructions: CONTRACT_TEXT,
            hint: (!pass).then_some(HINT),
            stderr: clip_stderr(&result.stderr_lossy()),
        }
    }

    /// The request never produced a run; report it as a failed evaluation
    fn system_error(language: String, err: &RunnerError) -> Self {
        Self {
            pass: false,
            got: String::new(),
            exit_code: SYSTEM_ERROR_EXIT_CODE,
            language,
            metrics: ExecutionMetrics::default(),
            agent_instructions: CONTRACT_TEXT,
            hint: Some(HINT),
            stderr: clip_stderr(&err.to_string()),
        }
    }
}

/// Output passes when the process succeeded and prints exactly the answer,
/// surrounding whitespace aside
fn is_pass(exit_code: i32, output: &str, answer: &str) -> bool {
    exit_code == 0 && output.trim() == answer.trim()
}

fn clip_stderr(stderr: &str) -> Option<String> {
    let stderr = stderr.trim();
    (!stderr.is_empty()).then(|| truncate_chars(stderr, MAX_STDERR_CHARS).to_string())
}

/// Cuts `s` to at most `max` characters without splitting one
fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

pub async fn post_eval_handler<E: IsolationEngine>(
    cases: web::Data<CaseRepository>,
    runner: web::Data<Runner<E>>,
    slots: web::Data<Semaphore>,
    body: web::Json<EvalRequest>,
) -> impl Responder {
    let EvalRequest {
        name,
        language,
        code,
    } = body.into_inner();

    let Some(case) = cases.get(&name) else {
        return not_found(format!("case not found: {name}"));
    };

    let code_chars = code.chars().count();
    if code_chars > MAX_CODE_CHARS {
        return invalid_argument(format!("code too long: {code_chars} > {MAX_CODE_CHARS}"));
    }

    if runner.table().lookup(&language).is_none() {
        return invalid_argument(format!(
            "unsupported language: {language}; supported: {}",
            runner.table().names().join(", ")
        ));
    }

    let _permit = match slots.acquire().await {
        Ok(permit) => permit,
        Err(e) => {
            log::error!("Evaluation slots closed: {e}");
            return HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_INTERNAL",
                code: 6,
            });
        }
    };

    let outcome = runner
        .evaluate(&language, code.as_bytes(), case.input.as_bytes())
        .await;

    let response = match outcome {
        Ok(result) => EvalResponse::judge(language, &result, &case.answer),
        Err(RunnerError::UnsupportedLanguage(language)) => {
            return invalid_argument(format!("unsupported language: {language}"));
        }
        Err(e) => {
            log::error!("Evaluation of {name} aborted: {e}");
            EvalResponse::system_error(language, &e)
        }
    };

    log::info!(
        "Evaluated {name} in {}: pass={}",
        response.language,
        response.pass
    );
    HttpResponse::Ok().json(response)
}
