//! Built-in quotes, research topics and feedback used instead of online services.

use rand::seq::SliceRandom;
use rand::Rng;

pub const QUOTES: [&str; 6] = [
    "The art of medicine consists of amusing the patient while nature cures the disease. - Voltaire",
    "Wherever the art of Medicine is loved, there is also a love of Humanity. - Hippocrates",
    "Learning without thought is labor lost; thought without learning is perilous. - Confucius",
    "Success is the sum of small efforts, repeated day in and day out. - Robert Collier",
    "He who has a why to live can bear almost any how. - Friedrich Nietzsche",
    "Study hard what interests you the most in the most undisciplined, irreverent and original manner possible. - Richard Feynman",
];

pub fn daily_quote<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    QUOTES.choose(rng).copied().unwrap_or(QUOTES[0])
}

pub const MEDICAL_TOPICS: [&str; 5] = [
    "Pathophysiology of Hypertension",
    "CRISPR gene editing applications",
    "Antibiotic Resistance Mechanisms",
    "Advancements in Telemedicine",
    "The role of Gut Microbiome in Immunity",
];

pub const GENERAL_TOPICS: [&str; 5] = [
    "Principles of Quantum Mechanics",
    "The Fall of the Roman Republic",
    "Sustainable Urban Planning",
    "Introduction to Behavioral Economics",
    "The History of Artificial Intelligence",
];

pub const MEDICAL_CHALLENGE_REWARD: i64 = 20;
pub const GENERAL_CHALLENGE_REWARD: i64 = 15;

/// A challenge that has been picked but not stored yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChallengeDraft {
    pub category: &'static str,
    pub title: &'static str,
    pub reward: i64,
}

/// Picks one medical and one general research topic.
pub fn generate_challenges<R: Rng + ?Sized>(rng: &mut R) -> [ChallengeDraft; 2] {
    let medical = MEDICAL_TOPICS.choose(rng).copied().unwrap_or(MEDICAL_TOPICS[0]);
    let general = GENERAL_TOPICS.choose(rng).copied().unwrap_or(GENERAL_TOPICS[0]);
    [
        ChallengeDraft {
            category: "Medical",
            title: medical,
            reward: MEDICAL_CHALLENGE_REWARD,
        },
        ChallengeDraft {
            category: "General",
            title: general,
            reward: GENERAL_CHALLENGE_REWARD,
        },
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResearchDepth {
    Brief,
    Solid,
    Outstanding,
}

impl ResearchDepth {
    pub fn from_word_count(words: usize) -> Self {
        match words {
            0..=29 => ResearchDepth::Brief,
            30..=79 => ResearchDepth::Solid,
            _ => ResearchDepth::Outstanding,
        }
    }
}

/// Canned assessment of research notes, graded by length.
pub fn research_feedback(title: &str, notes: &str) -> String {
    let words = notes.split_whitespace().count();
    match ResearchDepth::from_word_count(words) {
        ResearchDepth::Brief => format!(
            "(Offline Mode) Your notes on \"{}\" are a bit brief ({} words). A concise summary is good, but try to elaborate more on the core mechanisms and clinical implications to deepen your understanding.",
            title, words
        ),
        ResearchDepth::Solid => format!(
            "(Offline Mode) Good effort on \"{}\". You have covered the basics well. To reach the next level, consider adding recent case studies or conflicting theories found in modern literature.",
            title
        ),
        ResearchDepth::Outstanding => format!(
            "(Offline Mode) Outstanding research depth! Your detailed analysis of \"{}\" shows a strong grasp of the subject. This level of detail will significantly aid your long-term retention.",
            title
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn quote_comes_from_the_list() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..20 {
            assert!(QUOTES.contains(&daily_quote(&mut rng)));
        }
    }

    #[test]
    fn generated_pair_is_one_medical_one_general() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..20 {
            let [medical, general] = generate_challenges(&mut rng);
            assert_eq!(medical.category, "Medical");
            assert_eq!(medical.reward, 20);
            assert!(MEDICAL_TOPICS.contains(&medical.title));
            assert_eq!(general.category, "General");
            assert_eq!(general.reward, 15);
            assert!(GENERAL_TOPICS.contains(&general.title));
        }
    }

    #[test]
    fn generation_is_deterministic_for_a_seed() {
        let a = generate_challenges(&mut StdRng::seed_from_u64(5));
        let b = generate_challenges(&mut StdRng::seed_from_u64(5));
        assert_eq!(a, b);
    }

    #[test]
    fn depth_boundaries() {
        assert_eq!(ResearchDepth::from_word_count(0), ResearchDepth::Brief);
        assert_eq!(ResearchDepth::from_word_count(29), ResearchDepth::Brief);
        assert_eq!(ResearchDepth::from_word_count(30), ResearchDepth::Solid);
        assert_eq!(ResearchDepth::from_word_count(79), ResearchDepth::Solid);
        assert_eq!(ResearchDepth::from_word_count(80), ResearchDepth::Outstanding);
    }

    #[test]
    fn brief_feedback_mentions_word_count() {
        let text = research_feedback("CRISPR", "  short   notes here ");
        assert!(text.contains("\"CRISPR\""));
        assert!(text.contains("(3 words)"));
    }

    #[test]
    fn long_notes_are_outstanding() {
        let notes = "word ".repeat(120);
        assert!(research_feedback("Telemedicine", &notes).starts_with("(Offline Mode) Outstanding"));
    }
}
