//! Intent router — the cheap pre-classifier.
//!
//! Pure keyword/regex heuristics over the inbound message, Spanish and
//! English. Detects greetings, gratitude, spam, and out-of-scope requests
//! and short-circuits them with a canned local response. Never invokes a
//! provider, so it is safe to run on every message.

use regex::Regex;

/// What the router decided the message is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Greeting,
    Gratitude,
    Spam,
    OutOfScope,
    /// A real domain question — proceed down the pipeline.
    Domain,
}

/// The routing decision for one message.
#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub intent: Intent,
    /// False means the turn is answered locally with `local_response`.
    pub proceed: bool,
    pub local_response: Option<String>,
}

impl RouteDecision {
    fn shortcut(intent: Intent, response: impl Into<String>) -> Self {
        Self {
            intent,
            proceed: false,
            local_response: Some(response.into()),
        }
    }

    fn proceed() -> Self {
        Self {
            intent: Intent::Domain,
            proceed: true,
            local_response: None,
        }
    }
}

const GREETING_RESPONSE: &str = "¡Hola! Soy el asistente virtual de la institución. \
     Puedo ayudarte con información sobre programas académicos, inscripciones, \
     pagos y cobranza. ¿En qué te puedo ayudar?";

const GRATITUDE_RESPONSE: &str = "¡Con gusto! Si necesitas algo más sobre programas, \
     alumnos o pagos, aquí estoy.";

const SPAM_RESPONSE: &str = "No puedo ayudar con ese tipo de contenido. Si tienes una \
     pregunta sobre la institución, con gusto la reviso.";

const OUT_OF_SCOPE_RESPONSE: &str = "Ese tema está fuera de mi alcance: solo manejo \
     información de la institución (programas, alumnos, pagos y cobranza).";

/// The heuristic classifier. Compile once, reuse per message.
pub struct IntentRouter {
    greeting: Regex,
    gratitude: Regex,
    spam_url: Regex,
    repeated_char: Regex,
    out_of_scope: Regex,
}

impl IntentRouter {
    pub fn new() -> Self {
        // Anchored so "hola, ¿cuánto hemos recaudado?" is NOT a bare greeting.
        let greeting = Regex::new(
            r"(?i)^\s*(hola+|buen[oa]s?\s*(d[ií]as|tardes|noches)?|hello|hi|hey|saludos)\s*[!.¡]*\s*$",
        )
        .expect("static regex");
        let gratitude =
            Regex::new(r"(?i)^\s*(muchas\s+)?(gracias|thank\s*you|thanks|ty)\s*[!.]*\s*$")
                .expect("static regex");
        let spam_url = Regex::new(r"(?i)https?://\S+\.(ru|xyz|top|click)\b").expect("static regex");
        let repeated_char = Regex::new(r"(.)\1{9,}").expect("static regex");
        let out_of_scope = Regex::new(
            r"(?i)\b(chiste|broma|clima|f[úu]tbol|horóscopo|loter[ií]a|weather|joke|bitcoin|crypto)\b",
        )
        .expect("static regex");

        Self {
            greeting,
            gratitude,
            spam_url,
            repeated_char,
            out_of_scope,
        }
    }

    /// Classify one message. Tenant-independent today; the signature keeps
    /// the tenant available for per-tenant canned responses later.
    pub fn classify(&self, message: &str) -> RouteDecision {
        let trimmed = message.trim();

        if self.greeting.is_match(trimmed) {
            return RouteDecision::shortcut(Intent::Greeting, GREETING_RESPONSE);
        }
        if self.gratitude.is_match(trimmed) {
            return RouteDecision::shortcut(Intent::Gratitude, GRATITUDE_RESPONSE);
        }
        if self.spam_url.is_match(trimmed)
            || self.repeated_char.is_match(trimmed)
            || trimmed.len() > 4000
        {
            return RouteDecision::shortcut(Intent::Spam, SPAM_RESPONSE);
        }
        if self.out_of_scope.is_match(trimmed) {
            return RouteDecision::shortcut(Intent::OutOfScope, OUT_OF_SCOPE_RESPONSE);
        }

        RouteDecision::proceed()
    }
}

impl Default for IntentRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_greetings_shortcut() {
        let router = IntentRouter::new();
        for msg in ["hola", "Hola!", "  buenos días ", "hello", "Buenas tardes"] {
            let decision = router.classify(msg);
            assert_eq!(decision.intent, Intent::Greeting, "{msg}");
            assert!(!decision.proceed);
            assert!(decision.local_response.unwrap().contains("asistente"));
        }
    }

    #[test]
    fn greeting_with_question_proceeds() {
        let router = IntentRouter::new();
        let decision = router.classify("hola, ¿cuánto hemos recaudado este mes?");
        assert_eq!(decision.intent, Intent::Domain);
        assert!(decision.proceed);
    }

    #[test]
    fn gratitude_shortcuts() {
        let router = IntentRouter::new();
        let decision = router.classify("muchas gracias!");
        assert_eq!(decision.intent, Intent::Gratitude);
        assert!(!decision.proceed);
    }

    #[test]
    fn spam_urls_shortcut() {
        let router = IntentRouter::new();
        let decision = router.classify("gana dinero ya http://premios.xyz/claim");
        assert_eq!(decision.intent, Intent::Spam);
        assert!(!decision.proceed);
    }

    #[test]
    fn repeated_garbage_shortcuts() {
        let router = IntentRouter::new();
        let decision = router.classify("aaaaaaaaaaaaaaaa");
        assert_eq!(decision.intent, Intent::Spam);
    }

    #[test]
    fn off_topic_shortcuts() {
        let router = IntentRouter::new();
        let decision = router.classify("cuéntame un chiste");
        assert_eq!(decision.intent, Intent::OutOfScope);
        assert!(decision.local_response.unwrap().contains("fuera de mi alcance"));
    }

    #[test]
    fn domain_questions_proceed() {
        let router = IntentRouter::new();
        for msg in [
            "¿cuánto hemos recaudado este mes?",
            "busca al alumno José Hernández",
            "¿qué programas tienen inscripción abierta?",
            "dame el reporte de cartera vencida",
        ] {
            let decision = router.classify(msg);
            assert!(decision.proceed, "{msg} should proceed");
            assert!(decision.local_response.is_none());
        }
    }
}
