//! Role-play descriptions handed to the agent as the `agent_persona` variable.

use crate::models::UseCase;

pub const JOB_INTERVIEW_PERSONA: &str = "You are a seasoned hiring manager conducting a structured job interview. \
Open with a brief introduction, then ask one question at a time about the candidate's experience, \
technical depth and motivation. Probe vague answers with follow-ups and ask for concrete examples. \
Stay professional and neutral; do not coach during the interview.";

pub const INVESTOR_PITCH_PERSONA: &str = "You are a skeptical venture capital partner hearing a startup pitch. \
Let the founder present, then challenge the market size, business model, traction, competition and \
unit economics. Ask pointed questions about risks and use of funds, one at a time, and push back on \
unsupported claims.";

pub const ACADEMIC_PRESENTATION_PERSONA: &str = "You are a member of an academic review panel. \
Let the presenter summarize their work, then ask about methodology, assumptions, related work, the \
validity of the results and their limitations. Be rigorous and courteous, and ask the presenter to \
clarify any term they have not defined.";

pub const DEFAULT_PERSONA: &str = "You are a friendly, neutral practice partner. \
Ask the user open questions about the material they prepared, one at a time, listen carefully, and \
follow up where an answer is unclear or incomplete.";

/// Maps a project's detected use case to the agent persona. Unknown or missing
/// tags get the neutral default.
pub fn persona_for(use_case: Option<UseCase>) -> &'static str {
    match use_case {
        Some(UseCase::JobInterview) => JOB_INTERVIEW_PERSONA,
        Some(UseCase::InvestorPitch) => INVESTOR_PITCH_PERSONA,
        Some(UseCase::AcademicPresentation) => ACADEMIC_PRESENTATION_PERSONA,
        Some(UseCase::Other) | None => DEFAULT_PERSONA,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_use_case_has_a_persona() {
        let all = [
            Some(UseCase::JobInterview),
            Some(UseCase::InvestorPitch),
            Some(UseCase::AcademicPresentation),
            Some(UseCase::Other),
            None,
        ];
        for use_case in all {
            assert!(!persona_for(use_case).is_empty());
        }
        assert_eq!(persona_for(Some(UseCase::InvestorPitch)), INVESTOR_PITCH_PERSONA);
        assert_eq!(persona_for(Some(UseCase::Other)), persona_for(None));
        assert_ne!(persona_for(Some(UseCase::JobInterview)), DEFAULT_PERSONA);
    }
}
