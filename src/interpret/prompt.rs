//! Prompt assembly: a fact-grounded system instruction and user message.

use std::fmt::Write;

use crate::chart::ChartFacts;

pub const DEFAULT_PERSONA: &str = "You are a seasoned astrologer with a calm, precise voice. \
Speak directly to the person whose chart this is.";

const DEFAULT_QUESTION: &str = "Give me a general reading of my chart.";

/// What the model should be told, built once per request.
#[derive(Debug, Clone)]
pub struct InterpretationRequest {
    facts: ChartFacts,
    question: String,
    audience_hint: String,
}

impl InterpretationRequest {
    pub fn new(facts: ChartFacts, question: &str, audience_hint: impl Into<String>) -> Self {
        let question = question.trim();
        Self {
            facts,
            question: if question.is_empty() { DEFAULT_QUESTION.to_string() } else { question.to_string() },
            audience_hint: audience_hint.into(),
        }
    }

    pub fn facts(&self) -> &ChartFacts {
        &self.facts
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn audience_hint(&self) -> &str {
        &self.audience_hint
    }
}

pub fn system_instruction(persona: &str) -> String {
    let mut system = String::new();
    system.push_str(persona.trim());
    system.push_str("\n\nTask: interpret the user's verified natal chart and answer their question.\n");
    system.push_str("\nGrounding rules:\n");
    system.push_str("1) Base every statement about placements STRICTLY on the [Natal Data Verified] block.\n");
    system.push_str("2) Do not invent, guess or mention placements, houses or aspects that are not listed there.\n");
    system.push_str("3) If the question needs data that is not listed, say so instead of filling it in.\n");
    system.push_str("\nStructure:\n");
    system.push_str("1. Greeting: a brief opening that uses the birth place and date.\n");
    system.push_str("2. Core: Sun, Moon and Ascendant, using the verified signs.\n");
    system.push_str("3. Answer: respond to the user's specific question from the chart.\n");
    system.push_str("4. Advice: one specific, actionable step.\n");
    system
}

pub fn user_message(request: &InterpretationRequest) -> String {
    let mut user = String::from("[Natal Data Verified]\n");
    for (body, sign) in request.facts.iter() {
        let _ = writeln!(user, "{}: {}", body, sign);
    }
    if !request.audience_hint.is_empty() {
        let _ = writeln!(user, "\n[Subject]\n{}", request.audience_hint);
    }
    let _ = write!(user, "\nUser Question: {}", request.question);
    user
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::{Body, ChartSubject};
    use std::collections::BTreeMap;

    fn facts() -> ChartFacts {
        let signs = ["Sco", "Can", "Lib", "Sag", "Cap", "Sco", "Can", "Cap"];
        let placements: BTreeMap<String, String> = Body::ALL
            .iter()
            .zip(signs)
            .map(|(b, s)| (b.label().to_string(), s.to_string()))
            .collect();
        ChartFacts::from_subject(&ChartSubject { name: "Neo".into(), placements }).unwrap()
    }

    #[test]
    fn test_user_message_lists_facts_in_order() {
        let req = InterpretationRequest::new(facts(), "Will I achieve financial freedom?", "Neo, Beijing");
        let msg = user_message(&req);

        let expected = "[Natal Data Verified]\nSun: Scorpio\nMoon: Cancer\nAscendant: Libra\nMercury: Sagittarius\n\
Venus: Capricorn\nMars: Scorpio\nJupiter: Cancer\nSaturn: Capricorn\n";
        assert!(msg.starts_with(expected), "{}", msg);
        assert!(msg.contains("[Subject]\nNeo, Beijing"));
        assert!(msg.ends_with("User Question: Will I achieve financial freedom?"));
    }

    #[test]
    fn test_blank_question_gets_default() {
        let req = InterpretationRequest::new(facts(), "   ", "");
        assert_eq!(req.question(), DEFAULT_QUESTION);
        assert!(!user_message(&req).contains("[Subject]"));
    }

    #[test]
    fn test_system_instruction_forbids_invention() {
        let system = system_instruction(DEFAULT_PERSONA);
        assert!(system.starts_with("You are a seasoned astrologer"));
        assert!(system.contains("STRICTLY on the [Natal Data Verified] block"));
        assert!(system.contains("Do not invent"));
    }
}
