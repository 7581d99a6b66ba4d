//! Keyword-based extraction of typed fields from free-text booking
//! questions.
//!
//! The upstream booking form questions are free text, so the mapping from
//! question to analytic column is inherently fuzzy. The keyword table is
//! static and the mapping is a plain function so the behaviour stays
//! directly testable against the literal keyword list.

/// Analytic columns a question can map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionField {
    InterestedService,
    DiscoveryChannel,
    WebsiteUrl,
    PhoneNumber,
    LinkedinUrl,
}

/// Map a raw question to zero or one target fields by case-insensitive
/// substring matching, in fixed priority order.
pub fn classify_question(question: &str) -> Option<QuestionField> {
    let q = question.to_lowercase();
    if q.contains("service") && q.contains("interested") {
        Some(QuestionField::InterestedService)
    } else if q.contains("how did you find") || q.contains("find us") {
        Some(QuestionField::DiscoveryChannel)
    } else if q.contains("website") {
        Some(QuestionField::WebsiteUrl)
    } else if q.contains("phone") {
        Some(QuestionField::PhoneNumber)
    } else if q.contains("linkedin") && q.contains("profile") {
        Some(QuestionField::LinkedinUrl)
    } else {
        None
    }
}

/// Apply one question/answer pair to a record. A later answer to a
/// question matching the same field overwrites an earlier one.
pub fn apply_answer(record: &mut crate::model::AnalyticRecord, question: &str, answer: &str) {
    match classify_question(question) {
        Some(QuestionField::InterestedService) => {
            record.interested_service = Some(answer.to_string())
        }
        Some(QuestionField::DiscoveryChannel) => {
            record.discovery_channel = Some(answer.to_string())
        }
        Some(QuestionField::WebsiteUrl) => record.website_url = Some(answer.to_string()),
        Some(QuestionField::PhoneNumber) => record.phone_number = Some(answer.to_string()),
        Some(QuestionField::LinkedinUrl) => record.linkedin_url = Some(answer.to_string()),
        None => {}
    }
}
