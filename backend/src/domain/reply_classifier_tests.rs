//! Tests for reply intent scoring.

use super::*;
use rstest::{fixture, rstest};

#[fixture]
fn classifier() -> ReplyClassifier {
    ReplyClassifier::standard().expect("built-in patterns compile")
}

#[rstest]
#[case::deleted("Re: request", "Hello, your personal data has been deleted from our systems.", ReplyIntent::Deleted)]
#[case::deleted_we("", "We have erased your records as requested", ReplyIntent::Deleted)]
#[case::erasure_complete("Erasure complete", "Your erasure request has been processed.", ReplyIntent::Deleted)]
#[case::rejected("", "Unfortunately we cannot delete your data due to legal obligations.", ReplyIntent::Rejected)]
#[case::declined("", "We decline your request.", ReplyIntent::Rejected)]
#[case::not_deleted("", "Your data has not been deleted because you are a current customer.", ReplyIntent::Rejected)]
#[case::need_info("", "Before we proceed, please verify your identity.", ReplyIntent::NeedInfo)]
#[case::proof("", "Could you provide a copy of identification?", ReplyIntent::NeedInfo)]
#[case::identity_before_processing("", "We cannot process your request until you verify your identity.", ReplyIntent::NeedInfo)]
#[case::proof_before_action("", "We are unable to action your request without proof of identity.", ReplyIntent::NeedInfo)]
#[case::delete_once_verified("", "We cannot delete your data until you verify your identity.", ReplyIntent::NeedInfo)]
#[case::chatter("Auto-reply", "Thanks for your email, we will get back to you.", ReplyIntent::Unknown)]
#[case::empty("", "", ReplyIntent::Unknown)]
fn classifies_common_replies(
    classifier: ReplyClassifier,
    #[case] subject: &str,
    #[case] text: &str,
    #[case] expected: ReplyIntent,
) {
    assert_eq!(classifier.classify(subject, text, "").intent, expected);
}

#[rstest]
fn equal_top_scores_are_unknown(classifier: ReplyClassifier) {
    let outcome = classifier.classify(
        "",
        "Your account has been removed. Please verify your identity.",
        "",
    );
    assert_eq!(outcome.intent, ReplyIntent::Unknown);
}

#[rstest]
fn rejection_reason_is_the_matching_sentence(classifier: ReplyClassifier) {
    let outcome = classifier.classify(
        "Re: erasure",
        "Hi. We cannot delete your data due to legal obligations. Regards",
        "",
    );
    assert_eq!(outcome.intent, ReplyIntent::Rejected);
    assert_eq!(
        outcome.rejection_reason.as_deref(),
        Some("We cannot delete your data due to legal obligations.")
    );
}

#[rstest]
#[case("We cannot process your request until you verify your identity.")]
#[case("We are unable to action your request without proof of identity.")]
fn conditional_refusals_carry_no_reason(classifier: ReplyClassifier, #[case] text: &str) {
    let outcome = classifier.classify("Re: erasure", text, "");
    assert_eq!(outcome.intent, ReplyIntent::NeedInfo);
    assert!(outcome.rejection_reason.is_none());
    assert_eq!(crate::domain::lifecycle::reply_target(outcome.intent), None);
}

#[rstest]
fn non_rejections_carry_no_reason(classifier: ReplyClassifier) {
    let outcome = classifier.classify("", "Your data has been deleted.", "");
    assert!(outcome.rejection_reason.is_none());
}

#[rstest]
#[case::on_wrote("Noted.\n\nOn Mon, 5 Jan 2026, privacy@erasure.invalid wrote:\n> Please confirm your data has been deleted.")]
#[case::chevrons("Noted.\n> Please confirm your data has been deleted.\n> Thank you")]
#[case::outlook("Noted.\n-----Original Message-----\nPlease confirm your data has been deleted.")]
fn quoted_history_is_ignored(classifier: ReplyClassifier, #[case] text: &str) {
    assert_eq!(classifier.classify("", text, "").intent, ReplyIntent::Unknown);
}

#[rstest]
fn html_is_used_when_text_is_blank(classifier: ReplyClassifier) {
    let outcome = classifier.classify(
        "",
        "   ",
        "<p>We&nbsp;have <b>deleted</b> your profile.</p>",
    );
    assert_eq!(outcome.intent, ReplyIntent::Deleted);
}

#[rstest]
fn text_wins_over_html(classifier: ReplyClassifier) {
    let outcome = classifier.classify("", "Thanks!", "<p>Your data has been deleted.</p>");
    assert_eq!(outcome.intent, ReplyIntent::Unknown);
}

#[rstest]
#[case("abc", None, None)]
#[case("One. Two three. Four", Some(5), Some("Two three."))]
#[case("no boundary at all", Some(3), Some("no boundary at all"))]
fn sentence_extraction(
    #[case] text: &str,
    #[case] at: Option<usize>,
    #[case] expected: Option<&str>,
) {
    assert_eq!(sentence_at(text, at).as_deref(), expected);
}
