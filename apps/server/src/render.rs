//! Error pages for refused or failed downloads

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use keygate_types::{Denial, DenyPolicy, DenyReason};

/// HTTP status for a denial under the configured policy
pub fn denial_status(reason: DenyReason, policy: DenyPolicy) -> StatusCode {
    match (reason, policy) {
        (DenyReason::NotFound, _) => StatusCode::NOT_FOUND,
        (_, DenyPolicy::Page) => StatusCode::OK,
        (_, DenyPolicy::Forbidden) => StatusCode::FORBIDDEN,
    }
}

pub fn denial(denial: &Denial, policy: DenyPolicy) -> Response {
    let title = denial.resource_title.as_deref().unwrap_or("this download");
    let message = match denial.reason {
        DenyReason::NotFound => "The download link is invalid or no longer active.".to_string(),
        DenyReason::LimitReached => match denial.download_limit {
            Some(limit) => format!(
                "Sorry, the download limit of {} for \"{}\" has been reached.",
                limit, title
            ),
            None => "Sorry, the download limit has been reached.".to_string(),
        },
        DenyReason::AlreadyConsumed => format!(
            "Your IP address ({}) has already downloaded \"{}\". Each IP address can only download once.",
            denial.client_id, title
        ),
        DenyReason::NoFile => {
            "The download file is not available. Please contact the administrator.".to_string()
        }
    };

    page(
        denial_status(denial.reason, policy),
        denial.reason.title(),
        &message,
    )
}

pub fn delivery_failure() -> Response {
    page(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Download Failed",
        "The file could not be delivered. Please contact the administrator.",
    )
}

pub fn internal_error() -> Response {
    page(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Something Went Wrong",
        "The download could not be processed. Please try again later.",
    )
}

fn page(status: StatusCode, heading: &str, message: &str) -> Response {
    let body = format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{heading}</title></head>
<body>
<div class="messages messages--error">
  <h2>{heading}</h2>
  <p>{message}</p>
</div>
</body>
</html>
"#,
        heading = escape_html(heading),
        message = escape_html(message),
    );
    (status, Html(body)).into_response()
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_always_404() {
        assert_eq!(
            denial_status(DenyReason::NotFound, DenyPolicy::Page),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            denial_status(DenyReason::NotFound, DenyPolicy::Forbidden),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn policy_decides_other_statuses() {
        for reason in [
            DenyReason::LimitReached,
            DenyReason::AlreadyConsumed,
            DenyReason::NoFile,
        ] {
            assert_eq!(denial_status(reason, DenyPolicy::Page), StatusCode::OK);
            assert_eq!(
                denial_status(reason, DenyPolicy::Forbidden),
                StatusCode::FORBIDDEN
            );
        }
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html(r#"<b>"Tom & Jerry's"</b>"#),
            "&lt;b&gt;&quot;Tom &amp; Jerry&#39;s&quot;&lt;/b&gt;"
        );
    }

    #[test]
    fn failures_are_server_errors() {
        assert_eq!(delivery_failure().status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(internal_error().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
