//! Outbound message texts.
//!
//! All texts use HTML markup. Anything the user typed is escaped before it
//! is interpolated.

use chrono::{DateTime, Utc};

use crate::channels::escape_html;
use crate::config::{IntakeRules, PractitionerInfo};
use crate::intake::ValidationError;
use crate::store::{ContactInfo, ProblemCategory, StoredProblem};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Longest custom-problem excerpt quoted back to people.
pub const EXCERPT_CHARS: usize = 100;

/// First `max` characters of `text`, with an ellipsis when cut.
pub fn excerpt(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{}…", cut.trim_end())
}

/// How a stored problem reads in notifications and reports.
pub fn problem_display(problem: &StoredProblem, max_custom: usize) -> String {
    match (&problem.category, &problem.custom_text) {
        (Some(ProblemCategory::Custom), Some(text)) => {
            format!("Own problem: {}", escape_html(&excerpt(text, max_custom)))
        }
        (Some(category), _) => category.label().to_string(),
        (None, _) => "not specified".to_string(),
    }
}

pub fn welcome(first_name: Option<&str>) -> String {
    let name = first_name.map_or_else(|| "friend".to_string(), escape_html);
    format!(
        "👋 <b>Hello, {name}!</b>\n\n\
         I am the digital assistant of a practicing psychologist.\n\n\
         🎯 <b>I can help you:</b>\n\
         • Get a free guide on coping with anxiety\n\
         • Pin down what troubles you most\n\
         • Book a free 15-minute consultation\n\n\
         👉 <b>Choose an action below:</b>"
    )
}

pub fn guide_caption() -> &'static str {
    "✅ <b>Your free guide is ready!</b>\n\n\
     📖 <i>\"Coping with anxiety: 5 practical steps\"</i>"
}

pub fn fallback_guide_caption() -> &'static str {
    "✅ <b>Your free guide is ready!</b>"
}

/// Sent when the guide file could not be delivered at all.
pub fn guide_unavailable() -> &'static str {
    "✅ <b>Your free guide is ready!</b>\n\n\
     📖 <i>\"Coping with anxiety: 5 practical steps\"</i>\n\n\
     The file could not be attached right now. Ask for it again any time."
}

pub fn guide_question() -> &'static str {
    "📝 <b>While you open the guide, please answer one question:</b>\n\n\
     <i>What troubles you most right now?</i>\n\n\
     Pick one of the options or describe your own situation."
}

pub fn consultation_intro() -> &'static str {
    "📋 <b>Great, you would like to book a consultation.</b>\n\n\
     First, tell me what troubles you.\n\n\
     <i>Pick an option or describe your situation:</i>"
}

pub fn choose_option() -> &'static str {
    "Choose the option that fits best:"
}

pub fn about(practitioner: &PractitionerInfo) -> String {
    let contact = practitioner
        .handle
        .as_deref()
        .map(|h| format!("\n\nDirect contact: @{}", escape_html(h)))
        .unwrap_or_default();
    format!(
        "👩‍⚕️ <b>About the psychologist</b>\n\n\
         Hi, I am {name}.\n\
         • Integrative approach\n\
         • Working with anxiety, depression, relationships and self-esteem\n\
         • Education in counselling psychology\n\n\
         💼 <b>Approach:</b> individual work with every client, evidence-based methods.\n\n\
         📞 Consultations take place right here in Telegram.{contact}\n\n\
         To begin, tap \"🎁 Get the free guide\".",
        name = escape_html(&practitioner.name),
    )
}

/// Reaction to picking one of the fixed categories.
pub fn category_response(category: ProblemCategory) -> &'static str {
    match category {
        ProblemCategory::Anxiety => {
            "😰 <b>Anxiety and stress</b> are genuinely hard.\n\n\
             I work a lot with anxious states and know how important timely support is."
        }
        ProblemCategory::Relationships => {
            "💑 <b>Relationships and family</b> are the foundation of our lives.\n\n\
             Many people know how hard relationship struggles can be."
        }
        ProblemCategory::BurnoutSelfEsteem => {
            "😔 <b>Burnout and self-esteem</b> are important topics.\n\n\
             I will help you restore your resources."
        }
        ProblemCategory::Custom => "✅ <b>Thank you for sharing.</b>",
    }
}

pub fn diagnostic_offer() -> &'static str {
    "<b>Would you like to book a free 15-minute diagnostic session?</b>\n\n\
     During the session we will:\n\
     • Clarify your current situation\n\
     • Outline possible ways forward"
}

pub fn custom_problem_ack(text: &str) -> String {
    format!(
        "✅ <b>Thank you for your openness!</b>\n\n\
         <i>Your concern: \"{}\"</i>\n\n\
         <b>Would you like to book a free 15-minute consultation?</b>\n\n\
         I work with many kinds of questions and will help you sort out your situation.",
        escape_html(&excerpt(text, EXCERPT_CHARS))
    )
}

pub fn signup_prompt() -> &'static str {
    "Tap the button below to leave a request:"
}

pub fn custom_problem_prompt() -> &'static str {
    "📝 <b>Tell me about your problem</b>\n\n\
     Describe what troubles you in your own words:\n\n\
     <i>For example:\n\
     • \"I feel tired all the time and have lost interest in life\"\n\
     • \"Trouble at work, conflicts with colleagues\"\n\
     • \"I cannot find common ground with my teenage son\"</i>"
}

pub fn name_prompt() -> &'static str {
    "📋 <b>Great! I need a few details for the booking.</b>\n\n\
     <i>It takes just a couple of minutes.</i>\n\n\
     🔹 <b>How should I address you?</b>\n\
     (Enter your name):"
}

pub fn age_prompt(name: &str) -> String {
    format!(
        "👋 <b>Nice to meet you, {}!</b>\n\n\
         🔹 <b>How old are you?</b>\n\
         (Enter your age in digits, for example: 25)\n\n\
         <i>Age helps choose the most suitable approach.</i>",
        escape_html(name)
    )
}

pub fn contact_prompt(age: u32) -> String {
    format!(
        "✅ <b>Great, {age}.</b>\n\n\
         🔹 <b>Now send your Telegram username so I can reach you:</b>\n\
         (for example: @username or just username)\n\n\
         <i>The username is needed to confirm the booking.</i>"
    )
}

/// Re-prompt for a rejected answer.
pub fn reprompt(error: &ValidationError) -> String {
    match error {
        ValidationError::ProblemTooShort { min } => format!(
            "⚠️ <b>Please describe the problem in more detail (at least {min} characters).</b>\n\n\
             Tell me what exactly troubles you:"
        ),
        ValidationError::NameTooShort { min } => format!(
            "⚠️ <b>The name must have at least {min} characters.</b>\n\n\
             Please enter your name again:"
        ),
        ValidationError::AgeNotANumber { .. } => "⚠️ <b>Please enter your age in digits.</b>\n\n\
             Example: 25\n\n\
             Enter your age again:"
            .to_string(),
        ValidationError::AgeOutOfRange { min, max, .. } => format!(
            "⚠️ <b>Please enter a valid age (from {min} to {max}).</b>\n\n\
             Enter your age again:"
        ),
        ValidationError::HandleTooShort { .. } => {
            "⚠️ <b>Please enter a valid Telegram username.</b>\n\n\
             Example: @username or just username\n\n\
             Enter the username again:"
                .to_string()
        }
    }
}

pub fn confirmation(practitioner: &PractitionerInfo) -> String {
    let contact = match practitioner.handle.as_deref() {
        Some(handle) => {
            let handle = escape_html(handle);
            format!(
                "💬 <b>Expect a message in Telegram from @{handle}!</b>\n\n\
                 If something is urgent, write to @{handle} directly."
            )
        }
        None => "💬 <b>Expect a message in Telegram soon!</b>".to_string(),
    };
    format!(
        "🎉 <b>Thank you! Your request has been received.</b>\n\n\
         ✅ <i>I will contact you in Telegram shortly to agree on the details \
         and the time of the consultation.</i>\n\n\
         📅 <b>What happens next?</b>\n\
         1. Within 24 hours you will receive a message in Telegram\n\
         2. We agree on a convenient time for a 15-minute consultation\n\
         3. We run a free diagnostic of your situation\n\n\
         {contact}"
    )
}

pub fn operator_notification(
    user_id: &str,
    contact: &ContactInfo,
    problem: &str,
    at: DateTime<Utc>,
) -> String {
    format!(
        "🔔 <b>NEW CONSULTATION REQUEST!</b>\n\n\
         👤 <b>Name:</b> {name}\n\
         🎂 <b>Age:</b> {age}\n\
         🎯 <b>Problem:</b> {problem}\n\
         📱 <b>Telegram:</b> @{handle}\n\
         🆔 <b>User ID:</b> {user_id}\n\n\
         ⏰ <b>Time:</b> {time}",
        name = escape_html(&contact.name),
        age = contact.age,
        handle = escape_html(&contact.handle),
        time = at.format(TIME_FORMAT),
    )
}

pub fn startup_notice(at: DateTime<Utc>) -> String {
    format!(
        "🤖 <b>The funnel bot has started.</b>\n\n\
         ⏰ <b>Started at:</b> {}\n\
         ✅ <b>Status:</b> ready\n\n\
         <i>Send /start to check it.</i>",
        at.format(TIME_FORMAT)
    )
}

pub fn fallback_hint() -> &'static str {
    "🤖 <b>I am the psychologist's assistant bot.</b>\n\n\
     To begin, send /start or choose an action in the menu.\n\n\
     For help, send /help"
}

pub fn help(rules: &IntakeRules) -> String {
    format!(
        "📚 <b>COMMANDS</b>\n\n\
         🎯 <b>For everyone:</b>\n\
         • /start - start over\n\
         • /help - show this help\n\n\
         🎯 <b>Main actions (menu):</b>\n\
         • 🎁 Get the free guide - receive the guide and pick a problem\n\
         • 📞 Book a consultation - go straight to booking\n\
         • ℹ️ About the psychologist - who you will be talking to\n\n\
         🔄 <b>How it works:</b>\n\
         1. Get the guide\n\
         2. Pick a problem (or describe your own, at least {min_problem} characters)\n\
         3. Send your name, age ({min_age}-{max_age}) and Telegram username\n\
         4. Leave a request for a free consultation\n\n\
         👨‍💼 <b>Operator commands:</b>\n\
         • /stats - statistics\n\
         • /export - export all leads as a spreadsheet\n\n\
         <i>Consultations take place in Telegram.</i>",
        min_problem = rules.min_problem_len,
        min_age = rules.min_age,
        max_age = rules.max_age,
    )
}

pub fn test_ok() -> &'static str {
    "✅ <b>Test passed!</b>\n\nThe bot is working."
}

pub fn permission_denied() -> &'static str {
    "⛔ <b>You are not allowed to run this command.</b>"
}

/// Shown when a storage step failed; the user can simply retry.
pub fn store_failure() -> &'static str {
    "😔 <b>Sorry, something went wrong on our side.</b>\n\n\
     Your answer was not saved. Please try again in a moment."
}

pub fn stats_unavailable() -> &'static str {
    "❌ <b>Could not load statistics.</b>"
}

pub fn export_started() -> &'static str {
    "📊 <b>Starting the export...</b>\n\n<i>This may take a few seconds.</i>"
}

pub fn export_empty() -> &'static str {
    "📭 <b>The database is empty.</b>\n\nNothing to export."
}

pub fn export_failed(reason: &str) -> String {
    format!(
        "❌ <b>Export failed:</b>\n\n<code>{}</code>",
        escape_html(reason)
    )
}

pub fn export_caption(total_users: u64, complete_records: u64, at: DateTime<Utc>) -> String {
    format!(
        "📁 <b>Lead database</b>\n\n\
         📊 <b>Statistics:</b>\n\
         • Users: {total_users}\n\
         • Requests: {complete_records}\n\n\
         ⏰ <b>Exported at:</b>\n{}",
        at.format(TIME_FORMAT)
    )
}
