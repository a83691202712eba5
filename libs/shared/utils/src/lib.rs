pub mod clock;
pub mod extractor;
pub mod jwt;
pub mod test_utils;
pub mod validation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use extractor::{identity_from_headers, require_admin};
pub use jwt::{bearer_token, decode_claims, JwtTokenDecoder, TokenDecoder};
pub use validation::InputValidator;
