//! Wire protocol and data model shared by the simulation server and its clients.
//!
//! Every request and every response is a single ASCII line terminated by `\n`.
//! Requests are bare tokens (`reset`, `obs`, `info` or a decimal action code);
//! responses carry a one-letter tag followed by comma-separated fields:
//!
//! | tag | fields |
//! |-----|--------|
//! | `o:` | the four observation components |
//! | `r:` | observation, reward, done (`0`/`1`) |
//! | `i:` | observation length, action count |
//! | `e:` | free-form error message |

use std::fmt;
use thiserror::Error;

pub const OBSERVATION_LEN: usize = 4;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const BASE_PORT: u16 = 8080;
pub const LISTEN_BACKLOG: u32 = 10;
/// Longest request line a server will buffer, terminator included.
pub const MAX_REQUEST_LEN: usize = 256;
/// Longest slice of a bad request quoted back in an error line.
const ECHO_LEN: usize = 32;

/// Port owned by instance `index` of a pool starting at `base`.
///
/// Returns `None` when the port would not fit in a `u16`.
pub fn port_for(base: u16, index: usize) -> Option<u16> {
    let index = u16::try_from(index).ok()?;
    base.checked_add(index)
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("malformed request: {line}")]
    MalformedRequest { line: String },

    #[error("no observation yet, send reset first")]
    PrematureObservation,

    #[error("invalid action {code}, expected 0..{action_count}")]
    InvalidAction { code: i64, action_count: u32 },

    #[error("malformed response: {line}")]
    MalformedResponse { line: String },

    #[error("request longer than {limit} bytes")]
    RequestTooLong { limit: usize },
}

impl ProtocolError {
    /// Builds a `MalformedRequest` quoting at most a short prefix of `line`.
    pub fn malformed(line: &str) -> Self {
        let line = match line.char_indices().nth(ECHO_LEN) {
            Some((end, _)) => format!("{}...", &line[..end]),
            None => line.to_string(),
        };
        ProtocolError::MalformedRequest { line }
    }
}

/// Snapshot of the externally visible simulation state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub values: [f64; OBSERVATION_LEN],
}

impl Observation {
    pub fn new(values: [f64; OBSERVATION_LEN]) -> Self {
        Self { values }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepResult {
    pub observation: Observation,
    pub reward: f64,
    pub done: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Reset,
    ObserveCurrent,
    Info,
    Act(i64),
}

impl Request {
    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        let token = line.trim();
        match token {
            "reset" => Ok(Request::Reset),
            "obs" => Ok(Request::ObserveCurrent),
            "info" => Ok(Request::Info),
            _ => token
                .parse::<i64>()
                .map(Request::Act)
                .map_err(|_| ProtocolError::malformed(token)),
        }
    }

    /// Decodes a raw request line, rejecting bytes that are not UTF-8.
    pub fn decode_bytes(line: &[u8]) -> Result<Self, ProtocolError> {
        match std::str::from_utf8(line) {
            Ok(text) => Self::decode(text),
            Err(_) => Err(ProtocolError::malformed(
                String::from_utf8_lossy(line).trim(),
            )),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Request::Reset => "reset\n".to_string(),
            Request::ObserveCurrent => "obs\n".to_string(),
            Request::Info => "info\n".to_string(),
            Request::Act(code) => format!("{}\n", code),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Observation(Observation),
    Step(StepResult),
    Info {
        observation_len: usize,
        action_count: u32,
    },
    Error {
        message: String,
    },
}

impl From<ProtocolError> for Response {
    fn from(err: ProtocolError) -> Self {
        Response::Error {
            message: err.to_string(),
        }
    }
}

struct Fields<'a>(&'a [f64]);

impl fmt::Display for Fields<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{:.6}", value)?;
        }
        Ok(())
    }
}

impl Response {
    pub fn encode(&self) -> String {
        match self {
            Response::Observation(obs) => format!("o:{}\n", Fields(&obs.values)),
            Response::Step(result) => format!(
                "r:{},{:.6},{}\n",
                Fields(&result.observation.values),
                result.reward,
                u8::from(result.done)
            ),
            Response::Info {
                observation_len,
                action_count,
            } => format!("i:{},{}\n", observation_len, action_count),
            Response::Error { message } => format!("e:{}\n", message),
        }
    }

    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let malformed = || ProtocolError::MalformedResponse {
            line: line.to_string(),
        };

        let (tag, body) = line.split_once(':').ok_or_else(malformed)?;
        match tag {
            "o" => {
                let values = parse_floats(body).ok_or_else(malformed)?;
                let values: [f64; OBSERVATION_LEN] =
                    values.try_into().map_err(|_| malformed())?;
                Ok(Response::Observation(Observation::new(values)))
            }
            "r" => {
                let fields: Vec<&str> = body.split(',').collect();
                if fields.len() != OBSERVATION_LEN + 2 {
                    return Err(malformed());
                }
                let values = parse_floats(&fields[..OBSERVATION_LEN].join(","))
                    .ok_or_else(malformed)?;
                let values: [f64; OBSERVATION_LEN] =
                    values.try_into().map_err(|_| malformed())?;
                let reward = fields[OBSERVATION_LEN]
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| malformed())?;
                let done = match fields[OBSERVATION_LEN + 1].trim() {
                    "0" => false,
                    "1" => true,
                    _ => return Err(malformed()),
                };
                Ok(Response::Step(StepResult {
                    observation: Observation::new(values),
                    reward,
                    done,
                }))
            }
            "i" => {
                let (len, count) = body.split_once(',').ok_or_else(malformed)?;
                Ok(Response::Info {
                    observation_len: len.trim().parse().map_err(|_| malformed())?,
                    action_count: count.trim().parse().map_err(|_| malformed())?,
                })
            }
            "e" => Ok(Response::Error {
                message: body.to_string(),
            }),
            _ => Err(malformed()),
        }
    }
}

fn parse_floats(body: &str) -> Option<Vec<f64>> {
    body.split(',')
        .map(|field| field.trim().parse::<f64>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_decode_commands() {
        assert_eq!(Request::decode("reset").unwrap(), Request::Reset);
        assert_eq!(Request::decode("obs\n").unwrap(), Request::ObserveCurrent);
        assert_eq!(Request::decode("info\r\n").unwrap(), Request::Info);
        assert_eq!(Request::decode("1\n").unwrap(), Request::Act(1));
        assert_eq!(Request::decode("  0  ").unwrap(), Request::Act(0));
        assert_eq!(Request::decode("-3").unwrap(), Request::Act(-3));
    }

    #[test]
    fn test_decode_malformed() {
        for line in ["foo", "", "1.5", "reset now", "0x1", "RESET"] {
            match Request::decode(line) {
                Err(ProtocolError::MalformedRequest { .. }) => {}
                other => panic!("expected malformed request for {:?}, got {:?}", line, other),
            }
        }
    }

    #[test]
    fn test_malformed_echo_is_truncated() {
        let long = "x".repeat(200);
        let message = Response::from(Request::decode(&long).unwrap_err()).encode();
        assert_eq!(message, format!("e:malformed request: {}...\n", "x".repeat(32)));

        let short = Request::decode("foo").unwrap_err();
        assert_eq!(short.to_string(), "malformed request: foo");
    }

    #[test]
    fn test_decode_bytes() {
        assert_eq!(Request::decode_bytes(b"reset\n").unwrap(), Request::Reset);
        match Request::decode_bytes(b"\xff\xfe\n") {
            Err(ProtocolError::MalformedRequest { line }) => assert!(line.len() <= 40),
            other => panic!("expected malformed request, got {:?}", other),
        }
    }

    #[test]
    fn test_request_encoding() {
        assert_eq!(Request::Reset.encode(), "reset\n");
        assert_eq!(Request::ObserveCurrent.encode(), "obs\n");
        assert_eq!(Request::Act(1).encode(), "1\n");
    }

    #[test]
    fn test_observation_line_has_four_fields() {
        let line = Response::Observation(Observation::new([0.01, -0.02, 0.5, 3.0])).encode();
        assert!(line.starts_with("o:"));
        assert!(line.ends_with('\n'));
        let fields: Vec<&str> = line[2..].trim_end().split(',').collect();
        assert_eq!(fields.len(), 4);
        for field in fields {
            assert!(field.parse::<f64>().is_ok());
        }
    }

    #[test]
    fn test_step_line_format() {
        let result = StepResult {
            observation: Observation::new([0.1, 0.2, -0.3, 0.4]),
            reward: 1.0,
            done: true,
        };
        let line = Response::Step(result).encode();
        assert_eq!(line, "r:0.100000,0.200000,-0.300000,0.400000,1.000000,1\n");

        let not_done = StepResult {
            done: false,
            ..result
        };
        assert!(Response::Step(not_done).encode().ends_with(",0\n"));
    }

    #[test]
    fn test_response_decode_tolerates_formatting() {
        match Response::decode("o:0.5,-1,2.250,3e-2\n").unwrap() {
            Response::Observation(obs) => {
                assert_approx_eq!(obs.values[0], 0.5, 1e-9);
                assert_approx_eq!(obs.values[1], -1.0, 1e-9);
                assert_approx_eq!(obs.values[2], 2.25, 1e-9);
                assert_approx_eq!(obs.values[3], 0.03, 1e-9);
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn test_encoded_floats_parse_back_within_tolerance() {
        let values = [0.0123456789, -2.399999, 0.2094, -1e-7];
        let line = Response::Observation(Observation::new(values)).encode();
        match Response::decode(&line).unwrap() {
            Response::Observation(obs) => {
                for (decoded, original) in obs.values.iter().zip(values.iter()) {
                    assert_approx_eq!(*decoded, *original, 1e-6);
                }
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn test_response_decode_rejects_bad_lines() {
        for line in [
            "o:1,2,3",
            "o:1,2,3,4,5",
            "r:1,2,3,4,1.0",
            "r:1,2,3,4,1.0,2",
            "r:1,2,x,4,1.0,0",
            "x:1",
            "no tag",
        ] {
            assert!(
                matches!(
                    Response::decode(line),
                    Err(ProtocolError::MalformedResponse { .. })
                ),
                "should reject {:?}",
                line
            );
        }
    }

    #[test]
    fn test_info_and_error_lines() {
        let info = Response::Info {
            observation_len: OBSERVATION_LEN,
            action_count: 2,
        };
        assert_eq!(info.encode(), "i:4,2\n");
        assert_eq!(Response::decode("i:4,2\n").unwrap(), info);

        let err: Response = ProtocolError::PrematureObservation.into();
        let line = err.encode();
        assert!(line.starts_with("e:"));
        assert_eq!(Response::decode(&line).unwrap(), err);
    }

    #[test]
    fn test_port_assignment_distinct() {
        let ports: Vec<u16> = (0..32).map(|i| port_for(BASE_PORT, i).unwrap()).collect();
        for i in 0..ports.len() {
            for j in (i + 1)..ports.len() {
                assert_ne!(ports[i], ports[j]);
            }
        }
        assert_eq!(ports[0], 8080);
        assert_eq!(ports[31], 8111);
    }

    #[test]
    fn test_port_assignment_overflow() {
        assert_eq!(port_for(u16::MAX, 0), Some(u16::MAX));
        assert_eq!(port_for(u16::MAX, 1), None);
        assert_eq!(port_for(8080, 70_000), None);
    }
}
