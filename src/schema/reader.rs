//! Recorded session parsing and validation
//!
//! Sessions arrive either as one JSON document or as NDJSON: the header object
//! on the first line, then one event per line.

use crate::error::PersonaError;
use crate::schema::session::*;

pub struct SessionReader;

impl SessionReader {
    /// Parse a whole session document
    pub fn parse_json(json: &str) -> Result<RecordedSession, PersonaError> {
        let session: RecordedSession = serde_json::from_str(json)?;
        Ok(session)
    }

    /// Parse a header line followed by event lines. Events already present on
    /// the header come first.
    pub fn parse_ndjson(ndjson: &str) -> Result<RecordedSession, PersonaError> {
        let mut lines = ndjson
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty());

        let Some((header_line, header)) = lines.next() else {
            return Err(PersonaError::ParseError("Empty session".to_string()));
        };
        let mut session: RecordedSession =
            serde_json::from_str(header.trim()).map_err(|e| {
                PersonaError::ParseError(format!(
                    "Failed to parse header on line {}: {}",
                    header_line + 1,
                    e
                ))
            })?;

        for (line_num, line) in lines {
            match serde_json::from_str::<TimedEvent>(line.trim()) {
                Ok(event) => session.events.push(event),
                Err(e) => {
                    return Err(PersonaError::ParseError(format!(
                        "Failed to parse line {}: {}",
                        line_num + 1,
                        e
                    )));
                }
            }
        }
        Ok(session)
    }

    /// Parse either format: a document that fails to parse whole is retried
    /// as NDJSON
    pub fn parse(input: &str) -> Result<RecordedSession, PersonaError> {
        match Self::parse_json(input) {
            Ok(session) => Ok(session),
            Err(whole) => {
                let multi_line = input.lines().filter(|l| !l.trim().is_empty()).count() > 1;
                if multi_line {
                    Self::parse_ndjson(input)
                } else {
                    Err(whole)
                }
            }
        }
    }

    /// Header and per-event problems. An empty list means the session is
    /// replayable.
    pub fn validate(session: &RecordedSession) -> Vec<ValidationResult> {
        let mut results = Vec::new();

        if let Err(e) = session.validate() {
            results.push(ValidationResult {
                index: None,
                kind: None,
                error: e,
            });
        }

        let mut previous = 0;
        for (idx, event) in session.events.iter().enumerate() {
            let error = if event.at < previous {
                Some(ValidationError::OutOfOrder {
                    at: event.at,
                    previous,
                })
            } else {
                event.validate().err()
            };
            previous = previous.max(event.at);

            if let Some(error) = error {
                results.push(ValidationResult {
                    index: Some(idx),
                    kind: Some(event.event.kind()),
                    error,
                });
            }
        }

        results
    }

    /// Validate and turn the first problem into an error
    pub fn check(session: &RecordedSession) -> Result<(), PersonaError> {
        match Self::validate(session).into_iter().next() {
            None => Ok(()),
            Some(ValidationResult {
                index: Some(index),
                error,
                ..
            }) => Err(PersonaError::InvalidEvent {
                index,
                reason: error.to_string(),
            }),
            Some(ValidationResult { error, .. }) => Err(PersonaError::ParseError(error.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    /// Event index; `None` for header problems
    pub index: Option<usize>,
    pub kind: Option<&'static str>,
    pub error: ValidationError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const HEADER: &str = r#"{"schemaVersion":"persona.session.v1","startedAt":"2024-03-01T10:00:00Z","context":{"url":"https://acme.io/","screenWidth":1280,"screenHeight":800}}"#;

    #[test]
    fn test_parse_ndjson() {
        let input = format!(
            "{HEADER}\n\n{}\n{}\n",
            r#"{"at":100,"type":"mouse_move"}"#, r#"{"at":900,"type":"tick"}"#
        );
        let session = SessionReader::parse_ndjson(&input).unwrap();
        assert_eq!(session.events.len(), 2);
        assert_eq!(session.events[1], TimedEvent::new(900, SessionEvent::Tick));
    }

    #[test]
    fn test_parse_ndjson_reports_line() {
        let input = format!("{HEADER}\n{}\n{{bad", r#"{"at":1,"type":"tick"}"#);
        let err = SessionReader::parse_ndjson(&input).unwrap_err().to_string();
        assert!(err.contains("line 3"), "{err}");

        let err = SessionReader::parse_ndjson("   \n").unwrap_err().to_string();
        assert!(err.contains("Empty session"));
    }

    #[test]
    fn test_parse_detects_format() {
        assert!(SessionReader::parse(HEADER).unwrap().events.is_empty());

        let input = format!("{HEADER}\n{}", r#"{"at":5,"type":"shutdown"}"#);
        assert_eq!(SessionReader::parse(&input).unwrap().events.len(), 1);

        assert!(SessionReader::parse("{").is_err());
    }

    #[test]
    fn test_validate_reports_order_and_fields() {
        let input = format!(
            "{HEADER}\n{}\n{}\n{}",
            r#"{"at":500,"type":"tick"}"#,
            r#"{"at":200,"type":"tick"}"#,
            r#"{"at":700,"type":"navigate","url":"","kind":"push"}"#
        );
        let session = SessionReader::parse(&input).unwrap();
        let results = SessionReader::validate(&session);

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].index, Some(1));
        assert_eq!(
            results[0].error,
            ValidationError::OutOfOrder {
                at: 200,
                previous: 500
            }
        );
        assert_eq!(results[1].kind, Some("navigate"));

        let err = SessionReader::check(&session).unwrap_err();
        assert!(matches!(err, PersonaError::InvalidEvent { index: 1, .. }));
    }
}
