//! Canned response texts and rule-based next-step suggestions.

use const_format::concatcp;

pub const GREETING: &str = "Hello, I'm Dr. Sarah Chen. I'm here to help answer your health-related questions and provide educational information. How can I assist you today?";

pub const DISCLAIMER: &str = "I want to remind you that I'm an AI assistant providing educational information only. For medical advice, diagnosis, or treatment, please consult with a qualified healthcare provider.";

pub const EMERGENCY: &str = "I'm concerned about what you're describing. If you're experiencing a medical emergency, please call emergency services (911 in the US) or go to the nearest emergency room immediately.";

pub const FOLLOW_UP: &str = "It would be helpful to know more about your situation. Could you tell me a bit more about your symptoms and when they started?";

pub const REFERRAL: &str = "Based on what you've shared, I'd recommend consulting with a healthcare provider who can properly evaluate your situation and provide appropriate care.";

/// Full reply for messages that trip the emergency screen
pub const EMERGENCY_RESPONSE: &str = concatcp!(
    EMERGENCY,
    "\n\n",
    "If you need immediate medical attention, please call emergency services or go to the nearest emergency room."
);

/// Substituted for the model reply when generation fails
pub const GENERATION_FALLBACK: &str = "I understand you have health-related questions, and I want to help. \
However, I'm currently experiencing technical difficulties. \
Please try again in a moment, or consider consulting with a healthcare provider for immediate assistance.";

/// Returned when the pipeline itself fails
pub const PIPELINE_FALLBACK: &str = "I apologize, but I'm experiencing technical difficulties right now. \
Please try again in a moment, or if you have an urgent medical concern, please contact a healthcare provider directly.";

/// Attached to every chat response
pub const MEDICAL_DISCLAIMER: &str = "This information is for educational purposes only. Please consult with a qualified healthcare provider for medical advice, diagnosis, or treatment.";

const SYMPTOM_WORDS: &[&str] = &["symptoms", "condition", "diagnosis"];
const MEDICATION_WORDS: &[&str] = &["medication", "treatment", "prescription"];

/// Suggested next steps for a model reply.
pub fn generate_next_steps(ai_response: &str) -> Vec<String> {
    let lower = ai_response.to_lowercase();
    let mut steps = vec![
        "Consider scheduling an appointment with a healthcare provider".to_string(),
        "Keep track of your symptoms and their progression".to_string(),
    ];

    if SYMPTOM_WORDS.iter().any(|w| lower.contains(w)) {
        steps.push("Prepare a list of your symptoms and when they started".to_string());
    }
    if MEDICATION_WORDS.iter().any(|w| lower.contains(w)) {
        steps.push("Discuss any current medications with your healthcare provider".to_string());
    }

    steps
}

/// Appends the new-conversation disclaimer to a model reply.
pub fn with_disclaimer(reply: &str) -> String {
    format!("{}\n\n{}", reply, DISCLAIMER)
}
