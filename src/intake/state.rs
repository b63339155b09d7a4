//! Intake state machine: tracks which field the user is currently answering.
//!
//! `transition` is pure: it never touches storage. Effects that commit data
//! carry the state to move to, and the caller applies it only after the
//! write succeeded. A failed write therefore leaves the user where they were.

use crate::config::IntakeRules;
use crate::intake::validation::{
    ValidationError, normalize_contact_handle, validate_age, validate_custom_problem,
    validate_name,
};
use crate::store::{ContactInfo, ProblemCategory, ProblemSelection};

/// Per-user conversation position.
///
/// Values collected in earlier steps ride along in the variant until the
/// final commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum IntakeState {
    #[default]
    Idle,
    ProblemMenu,
    CustomProblemEntry,
    NameEntry,
    AgeEntry {
        name: String,
    },
    ContactEntry {
        name: String,
        age: u32,
    },
}

impl IntakeState {
    /// Whether the next free-text message is an answer to a question.
    pub fn expects_text(&self) -> bool {
        matches!(
            self,
            Self::CustomProblemEntry
                | Self::NameEntry
                | Self::AgeEntry { .. }
                | Self::ContactEntry { .. }
        )
    }
}

impl std::fmt::Display for IntakeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::ProblemMenu => "problem_menu",
            Self::CustomProblemEntry => "custom_problem_entry",
            Self::NameEntry => "name_entry",
            Self::AgeEntry { .. } => "age_entry",
            Self::ContactEntry { .. } => "contact_entry",
        };
        write!(f, "{s}")
    }
}

/// What the user did, stripped of transport details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeInput {
    /// Asked for the guide or a consultation; show the problem choices.
    OpenMenu,
    ChooseCategory(ProblemCategory),
    ChooseCustom,
    StartSignup,
    Text(String),
}

/// What the caller must do as a result of a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    ShowProblemMenu,
    PromptCustomProblem,
    PromptName,
    PromptAge { name: String },
    PromptContact { age: u32 },
    /// Answer rejected; ask the same question again.
    Reprompt(ValidationError),
    /// Persist the problem, then offer signup.
    CommitProblem(ProblemSelection),
    /// Persist contact details, then confirm and notify the operator.
    CommitContact(ContactInfo),
    /// Free text that no question is waiting for.
    Unhandled,
}

impl Effect {
    /// Whether applying `next` must wait for a successful store write.
    pub fn needs_commit(&self) -> bool {
        matches!(self, Self::CommitProblem(_) | Self::CommitContact(_))
    }
}

/// Result of feeding one input to the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: IntakeState,
    pub effect: Effect,
}

impl Transition {
    fn to(next: IntakeState, effect: Effect) -> Self {
        Self { next, effect }
    }

    fn stay(state: &IntakeState, effect: Effect) -> Self {
        Self {
            next: state.clone(),
            effect,
        }
    }
}

/// Compute the next state and effect for `input` in `state`.
///
/// Button inputs are honored from any state; free text is interpreted by
/// the question currently open.
pub fn transition(state: &IntakeState, input: IntakeInput, rules: &IntakeRules) -> Transition {
    use IntakeState::*;

    match input {
        IntakeInput::OpenMenu => Transition::to(ProblemMenu, Effect::ShowProblemMenu),
        IntakeInput::ChooseCategory(ProblemCategory::Custom) | IntakeInput::ChooseCustom => {
            Transition::to(CustomProblemEntry, Effect::PromptCustomProblem)
        }
        IntakeInput::ChooseCategory(category) => Transition::to(
            Idle,
            Effect::CommitProblem(ProblemSelection::Fixed(category)),
        ),
        IntakeInput::StartSignup => Transition::to(NameEntry, Effect::PromptName),
        IntakeInput::Text(text) => on_text(state, &text, rules),
    }
}

fn on_text(state: &IntakeState, text: &str, rules: &IntakeRules) -> Transition {
    use IntakeState::*;

    let outcome: Result<Transition, ValidationError> = match state {
        Idle | ProblemMenu => Ok(Transition::stay(state, Effect::Unhandled)),
        CustomProblemEntry => validate_custom_problem(text, rules).map(|problem| {
            Transition::to(Idle, Effect::CommitProblem(ProblemSelection::Custom(problem)))
        }),
        NameEntry => validate_name(text, rules).map(|name| {
            Transition::to(
                AgeEntry { name: name.clone() },
                Effect::PromptAge { name },
            )
        }),
        AgeEntry { name } => validate_age(text, rules).map(|age| {
            Transition::to(
                ContactEntry {
                    name: name.clone(),
                    age,
                },
                Effect::PromptContact { age },
            )
        }),
        ContactEntry { name, age } => normalize_contact_handle(text, rules).map(|handle| {
            Transition::to(
                Idle,
                Effect::CommitContact(ContactInfo {
                    name: name.clone(),
                    age: *age,
                    handle,
                }),
            )
        }),
    };

    outcome.unwrap_or_else(|e| {
        tracing::debug!(state = %state, reason = %e, "Intake answer rejected");
        Transition::stay(state, Effect::Reprompt(e))
    })
}
