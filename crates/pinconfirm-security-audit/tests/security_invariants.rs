//! Security invariant tests for the pinconfirm workspace.
//!
//! These scan the production sources of every `pinconfirm*` crate and fail
//! when a change regresses a property the PIN flow depends on: PINs and
//! secrets never reach logs or `Debug`, comparisons stay constant-time,
//! outbound clients never follow redirects, and the server persists its
//! attempt counters.

use regex::Regex;
use std::path::Path;
use walkdir::WalkDir;

/// Read all .rs source files from production crates (excluding tests and this crate).
fn production_source_files() -> Vec<(String, String)> {
    let root = Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap();

    let crates_dir = root.join("crates");
    let mut files = Vec::new();

    for entry in WalkDir::new(&crates_dir).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();

        if path.extension().and_then(|e| e.to_str()) != Some("rs") {
            continue;
        }

        let path_str = path.to_str().unwrap_or("");
        if !path_str.contains("pinconfirm") || path_str.contains("security-audit") {
            continue;
        }
        if path_str.contains("/tests/") || path_str.contains("\\tests\\") {
            continue;
        }

        if let Ok(content) = std::fs::read_to_string(path) {
            files.push((path_str.to_string(), content));
        }
    }

    assert!(
        !files.is_empty(),
        "no pinconfirm sources found under {}",
        crates_dir.display()
    );
    files
}

/// Lines before the first `#[cfg(test)]`, with comment lines dropped.
fn production_lines(content: &str) -> String {
    let mut result = Vec::new();

    for line in content.lines() {
        if line.contains("#[cfg(test)]") || line.trim().starts_with("mod tests") {
            break;
        }
        if line.trim_start().starts_with("//") {
            continue;
        }
        result.push(line);
    }

    result.join("\n")
}

fn line_of(content: &str, offset: usize) -> usize {
    content[..offset].lines().count().max(1)
}

#[test]
fn tracing_never_logs_pins_or_secrets() {
    let macro_re = Regex::new(r"tracing::(trace|debug|info|warn|error)!\(").unwrap();
    // A field named after a secret, or a secret-bearing binding formatted with % or ?.
    let leak_re = Regex::new(
        r"\b(pin|candidate|pepper|secret|upstream_secret|pin_hash|hmac_key|metrics_token)\s*=|[%?]\s*(pin|candidate|pepper|secret|pin_hash|hmac_key|metrics_token)\b",
    )
    .unwrap();

    for (path, content) in &production_source_files() {
        let prod = production_lines(content);

        for mat in macro_re.find_iter(&prod) {
            let rest = &prod[mat.start()..];
            let end = rest.find(");").map(|i| i + 2).unwrap_or(rest.len());
            let invocation = &rest[..end];

            assert!(
                !leak_re.is_match(invocation),
                "tracing call at {}:{} may log a PIN or secret: {}",
                path,
                line_of(&prod, mat.start()),
                invocation.lines().next().unwrap_or("").trim()
            );
        }
    }
}

#[test]
fn no_hardcoded_secrets_in_production_code() {
    let hex_re = Regex::new(r#""[a-fA-F0-9]{32,}""#).unwrap();
    let assign_re =
        Regex::new(r#"(?i)(pepper|secret|token)\w*\s*[:=]\s*(b?"[^"]{8,}"|Some\(b?")"#).unwrap();

    for (path, content) in &production_source_files() {
        let prod = production_lines(content);

        for re in [&hex_re, &assign_re] {
            if let Some(mat) = re.find(&prod) {
                panic!(
                    "potential hardcoded secret at {}:{}: {}",
                    path,
                    line_of(&prod, mat.start()),
                    mat.as_str()
                );
            }
        }
    }
}

#[test]
fn no_unwrap_or_expect_outside_allowed_sites() {
    let call_re = Regex::new(r"\.(unwrap|expect)\(").unwrap();

    // file suffix, required substring on the offending line
    let allowed: [(&str, &str); 3] = [
        // Registering static metrics only fails on a duplicate name.
        ("pinconfirm-server/src/metrics.rs", ".unwrap()"),
        ("pinconfirm-server/src/main.rs", "rate limiter config"),
        ("pinconfirm/src/credential.rs", "HMAC accepts any key length"),
    ];

    for (path, content) in &production_source_files() {
        let prod = production_lines(content);
        let normalized = path.replace('\\', "/");

        for (i, line) in prod.lines().enumerate() {
            if !call_re.is_match(line) {
                continue;
            }
            let is_allowed = allowed
                .iter()
                .any(|(file, marker)| normalized.ends_with(file) && line.contains(marker));
            assert!(
                is_allowed,
                "unwrap/expect in production code at {}:{}: {}. Propagate the error instead.",
                path,
                i + 1,
                line.trim()
            );
        }
    }
}

#[test]
fn secret_holders_redact_debug() {
    // (file suffix, type whose Debug must be hand-written)
    let holders = [
        ("pinconfirm/src/pin.rs", "PinCandidate"),
        ("pinconfirm/src/credential.rs", "PinHasher"),
        ("pinconfirm/src/protocol.rs", "VerifyRequest"),
        ("pinconfirm/src/protocol.rs", "SetPinRequest"),
        ("pinconfirm/src/ledger.rs", "HttpLedger"),
        ("pinconfirm-server/src/config.rs", "ServerConfig"),
    ];

    let files = production_source_files();
    for (suffix, ty) in holders {
        let (path, content) = files
            .iter()
            .find(|(p, _)| p.replace('\\', "/").ends_with(suffix))
            .unwrap_or_else(|| panic!("{suffix} not found"));
        let prod = production_lines(content);

        let derived = Regex::new(&format!(
            r"#\[derive\([^)]*\bDebug\b[^)]*\)\]\s*(#\[[^\]]*\]\s*)*pub (struct|enum) {ty}\b"
        ))
        .unwrap();
        assert!(
            !derived.is_match(&prod),
            "{ty} in {path} derives Debug; it holds a PIN or secret and must redact it"
        );

        let manual = Regex::new(&format!(r"impl (std::)?(fmt::)?Debug for {ty}\b")).unwrap();
        assert!(
            manual.is_match(&prod),
            "{ty} in {path} has no hand-written Debug impl"
        );
    }
}

#[test]
fn pin_candidate_is_wiped_on_drop() {
    let files = production_source_files();
    let (_, content) = files
        .iter()
        .find(|(p, _)| p.replace('\\', "/").ends_with("pinconfirm/src/pin.rs"))
        .expect("pin.rs not found");
    let prod = production_lines(content);

    assert!(
        prod.contains("impl Drop for PinCandidate"),
        "PinCandidate must clear its digits on drop"
    );
}

#[test]
fn pin_holders_cannot_be_cloned() {
    // A copy of the candidate would escape the wipe on drop.
    let holders = [
        ("pinconfirm/src/pin.rs", "PinCandidate"),
        ("pinconfirm/src/machine.rs", "ConfirmationState"),
    ];

    let files = production_source_files();
    for (suffix, ty) in holders {
        let (path, content) = files
            .iter()
            .find(|(p, _)| p.replace('\\', "/").ends_with(suffix))
            .unwrap_or_else(|| panic!("{suffix} not found"));
        let prod = production_lines(content);

        let derived = Regex::new(&format!(
            r"#\[derive\([^)]*\bClone\b[^)]*\)\]\s*(#\[[^\]]*\]\s*)*pub (struct|enum) {ty}\b"
        ))
        .unwrap();
        let manual = Regex::new(&format!(r"impl (std::)?(clone::)?Clone for {ty}\b")).unwrap();
        assert!(
            !derived.is_match(&prod) && !manual.is_match(&prod),
            "{ty} in {path} is Clone; it holds PIN digits and must not be copied"
        );
    }
}

#[test]
fn hmac_verification_is_constant_time() {
    for (path, content) in &production_source_files() {
        if !path.ends_with("credential.rs") {
            continue;
        }
        let prod = production_lines(content);

        // Every verify path must reach the MAC comparison, even on bad hex.
        for name in ["fn verify(", "fn verify_body("] {
            let Some(start) = prod.find(name) else {
                panic!("{name} missing from {path}");
            };
            let body = &prod[start..];
            let end = body[1..].find("\npub fn ").map(|i| i + 1).unwrap_or(body.len());
            let func = &body[..end];
            assert!(
                func.contains("verify_slice") && !func.contains("return false"),
                "{name} in {path} must compare through verify_slice without early returns"
            );
        }

        if prod.contains("fn constant_time_eq") {
            assert!(
                prod.contains("subtle::") || prod.contains("use subtle"),
                "constant_time_eq in {path} must use the subtle crate"
            );
        }
    }
}

#[test]
fn http_clients_disable_redirects() {
    let builder_re = Regex::new(r"reqwest::Client::builder\(\)").unwrap();
    let redirect_re = Regex::new(r"redirect\s*\(\s*.*Policy::none\(\)").unwrap();

    for (path, content) in &production_source_files() {
        let prod = production_lines(content);

        for mat in builder_re.find_iter(&prod) {
            let search_end = (mat.end() + 500).min(prod.len());
            let chain = &prod[mat.start()..search_end];
            assert!(
                redirect_re.is_match(chain),
                "reqwest::Client::builder() at {}:{} does not set redirect(Policy::none())",
                path,
                line_of(&prod, mat.start())
            );
        }
    }
}

#[test]
fn webhooks_reject_unsupported_schemes() {
    for (path, content) in &production_source_files() {
        if !path.ends_with("webhook.rs") {
            continue;
        }
        let prod = production_lines(content);
        if prod.contains("fn validate_webhook_urls") {
            assert!(
                prod.contains("return Err(") || prod.contains("Err(format!"),
                "webhook validation at {path} must return Err for unsupported URLs"
            );
        }
    }
}

#[test]
fn error_responses_do_not_leak_internals() {
    let leak_re = Regex::new(r"json\(.*(e\.to_string\(\)|format!\(.*\{e\}|\{:?\?\}.*, e\b)").unwrap();

    for (path, content) in &production_source_files() {
        if !content.contains("HttpResponse::") {
            continue;
        }
        let prod = production_lines(content);

        for (i, line) in prod.lines().enumerate() {
            assert!(
                !leak_re.is_match(line)
                    && !line.contains("database error")
                    && !line.contains("RUST_BACKTRACE"),
                "HTTP response at {}:{} may expose internal error detail: {}",
                path,
                i + 1,
                line.trim()
            );
        }
    }
}

#[test]
fn server_persists_attempt_counters() {
    for (path, content) in &production_source_files() {
        if !path.contains("pinconfirm-server") || !path.ends_with("bootstrap.rs") {
            continue;
        }
        let prod = production_lines(content);
        assert!(
            prod.contains("SqliteStore") && !prod.contains("InMemoryStore"),
            "server bootstrap at {path} must keep failed-attempt counters in SqliteStore"
        );
    }
}

#[test]
fn upstream_secret_is_mandatory() {
    for (path, content) in &production_source_files() {
        if !path.contains("pinconfirm-server") || !path.ends_with("state.rs") {
            continue;
        }
        let prod = production_lines(content);
        assert!(
            prod.contains("upstream_secret: Vec<u8>"),
            "upstream secret at {path} must be mandatory (Vec<u8>, not Option<Vec<u8>>)"
        );
    }
}
