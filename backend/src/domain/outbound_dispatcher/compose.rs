//! Email composition for the three dispatch stages.
//!
//! Wording is deliberately plain; the parts that matter to the engine are the
//! correlation headers and the confirmation link.

use url::Url;

use crate::domain::ports::OutboundEmail;
use crate::domain::{DeletionRequest, DispatchStage, Error};

use super::DispatcherConfig;

pub(super) const HEADER_MESSAGE_ID: &str = "Message-ID";
pub(super) const HEADER_TRACK_ID: &str = "X-Track-ID";
pub(super) const HEADER_IN_REPLY_TO: &str = "In-Reply-To";
pub(super) const HEADER_REFERENCES: &str = "References";

/// `<{stage}.{trackingId}@{domain}>`
pub(super) fn stage_message_id(
    request: &DeletionRequest,
    stage: DispatchStage,
    domain: &str,
) -> String {
    format!("<{}.{}@{}>", stage.as_str(), request.tracking_id, domain)
}

/// `{base}/operator/confirm?token=...`, keeping any path prefix of `base`.
pub(super) fn confirmation_url(base: &Url, token: &str) -> Result<Url, Error> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    let mut url = base
        .join("operator/confirm")
        .map_err(|err| Error::internal(format!("invalid confirmation url: {err}")))?;
    url.query_pairs_mut().clear().append_pair("token", token);
    Ok(url)
}

pub(super) struct Composition<'a> {
    pub request: &'a DeletionRequest,
    pub stage: DispatchStage,
    pub message_id: &'a str,
    pub confirm_url: &'a Url,
}

pub(super) fn compose(config: &DispatcherConfig, input: &Composition<'_>) -> OutboundEmail {
    let Composition {
        request,
        stage,
        message_id,
        confirm_url,
    } = input;
    let stage = *stage;

    let mut headers = vec![
        (HEADER_MESSAGE_ID.to_owned(), (*message_id).to_owned()),
        (HEADER_TRACK_ID.to_owned(), request.tracking_id.to_string()),
    ];
    if stage != DispatchStage::Initial
        && let Some(initial) = request.initial_message_id.as_deref()
    {
        let references = [
            Some(initial),
            request
                .follow_up_message_id
                .as_deref()
                .filter(|_| stage == DispatchStage::Escalation),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
        headers.push((HEADER_IN_REPLY_TO.to_owned(), initial.to_owned()));
        headers.push((HEADER_REFERENCES.to_owned(), references));
    }

    let cc = if stage == DispatchStage::Escalation {
        vec![config.regulator_address.clone()]
    } else {
        Vec::new()
    };

    let subject = match stage {
        DispatchStage::Initial => format!(
            "Personal data erasure request [{}]",
            request.tracking_id
        ),
        DispatchStage::FollowUp => format!(
            "Reminder: personal data erasure request [{}]",
            request.tracking_id
        ),
        DispatchStage::Escalation => format!(
            "Escalation: unanswered personal data erasure request [{}]",
            request.tracking_id
        ),
    };

    let categories = request.personal_data_categories.join(", ");
    let opening = match stage {
        DispatchStage::Initial => format!(
            "We write on behalf of one of your data subjects to request the erasure of the \
             personal data {} holds about them, under Article 17 GDPR.",
            request.broker_name
        ),
        DispatchStage::FollowUp => format!(
            "We have not received a response to our erasure request sent to {}. \
             Please act on it without further delay.",
            request.broker_name
        ),
        DispatchStage::Escalation => format!(
            "Our erasure request to {} remains unanswered. The supervisory authority \
             has been copied on this message.",
            request.broker_name
        ),
    };

    let text = format!(
        "{opening}\n\n\
         Data categories: {categories}\n\
         Reference: {tracking}\n\n\
         Once the data has been erased, please confirm here:\n{confirm_url}\n\n\
         You may also reply to this email.\n",
        tracking = request.tracking_id,
    );
    let html = format!(
        "<p>{opening}</p>\
         <p><strong>Data categories:</strong> {categories}<br>\
         <strong>Reference:</strong> {tracking}</p>\
         <p><a href=\"{url}\">Confirm erasure</a></p>\
         <p>You may also reply to this email.</p>",
        opening = escape_html(&opening),
        categories = escape_html(&categories),
        tracking = escape_html(request.tracking_id.as_ref()),
        url = escape_html(confirm_url.as_str()),
    );

    OutboundEmail {
        from: config.from_address.clone(),
        to: request.operator_email.clone(),
        cc,
        subject,
        html,
        text,
        headers,
    }
}

pub(crate) fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
