use serde::Deserialize;
use std::fmt;

/// Broad groups the consumer host sorts its error codes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidInput,
    Forbidden,
    Offline,
    Internal,
}

macro_rules! server_codes {
    ($($variant:ident = $code:literal, $category:ident, $message:literal;)*) => {
        /// Error codes returned by the consumer host in the `code` field of an error body.
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub enum ServerErrorCode {
            $($variant,)*
            Unknown(String),
        }

        impl ServerErrorCode {
            pub fn from_code(code: &str) -> Self {
                match code.trim() {
                    $($code => Self::$variant,)*
                    other => Self::Unknown(other.to_string()),
                }
            }

            pub fn as_code(&self) -> &str {
                match self {
                    $(Self::$variant => $code,)*
                    Self::Unknown(code) => code,
                }
            }

            pub fn category(&self) -> ErrorCategory {
                match self {
                    $(Self::$variant => ErrorCategory::$category,)*
                    Self::Unknown(_) => ErrorCategory::Internal,
                }
            }

            pub fn default_message(&self) -> &'static str {
                match self {
                    $(Self::$variant => $message,)*
                    Self::Unknown(_) => crate::error::DEFAULT_ERROR_MESSAGE,
                }
            }
        }
    };
}

server_codes! {
    NotLoggedIn = "403", Forbidden, "Not logged in, please sign in again";

    InvalidRequest = "1000", InvalidInput, "Invalid request";
    InvalidSignature = "1001", InvalidInput, "Invalid signature";
    InvalidMessage = "1002", InvalidInput, "Invalid sign-in message";
    InvalidAddress = "1003", InvalidInput, "Invalid address";
    InvalidDeployment = "1004", InvalidInput, "Invalid deployment id";
    InvalidPrice = "1005", InvalidInput, "Invalid price";
    InvalidExpiration = "1006", InvalidInput, "Invalid expiration";
    InvalidMaximum = "1007", InvalidInput, "Invalid maximum";
    InvalidApiKeyName = "1008", InvalidInput, "Invalid api key name";
    DuplicateApiKeyName = "1009", InvalidInput, "Api key name already exists";
    InvalidChannel = "1010", InvalidInput, "Invalid channel";
    InvalidTimeRange = "1011", InvalidInput, "Invalid time range";
    InvalidNonce = "1012", InvalidInput, "Invalid nonce";
    ExpiredMessage = "1013", InvalidInput, "Sign-in message expired";

    NotApproved = "2000", Forbidden, "Not approved";
    InsufficientBalance = "2001", Forbidden, "Insufficient balance";
    InsufficientAllowance = "2002", Forbidden, "Insufficient allowance";
    PlanLimitReached = "2003", Forbidden, "Hosting plan limit reached";
    ApiKeyLimitReached = "2004", Forbidden, "Api key limit reached";
    ChannelExpired = "2005", Forbidden, "Channel expired";
    ChannelOverspent = "2006", Forbidden, "Channel overspent";
    NotOwner = "2007", Forbidden, "Not the owner of this resource";

    IndexerOffline = "3000", Offline, "Indexer offline";
    ProjectOffline = "3001", Offline, "Project offline";
    NoAvailableIndexer = "3002", Offline, "No available indexer";

    InternalError = "4000", Internal, "Internal server error";
    NotFound = "4001", Internal, "Not found";
    PlanNotFound = "4002", Internal, "Hosting plan not found";
    ApiKeyNotFound = "4003", Internal, "Api key not found";
    ChannelNotFound = "4004", Internal, "Channel not found";
    UserNotFound = "4005", Internal, "User not found";
    DatabaseError = "4006", Internal, "Database error";
    ChainError = "4007", Internal, "Chain request failed";
}

impl ServerErrorCode {
    /// The single code that invalidates the cached session token.
    pub fn requires_reauth(&self) -> bool {
        matches!(self, Self::NotLoggedIn)
    }
}

/// An error body returned by the consumer host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub code: ServerErrorCode,
    pub message: String,
}

impl ServerError {
    pub fn new(code: &str, message: &str) -> Self {
        let code = ServerErrorCode::from_code(code);
        let message = if message.trim().is_empty() {
            code.default_message().to_string()
        } else {
            message.to_string()
        };
        Self { code, message }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code.as_code())
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: serde_json::Value,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

/// Extracts a server error from a response body, if the body has the error shape.
pub fn error_from_body(body: &serde_json::Value) -> Option<ServerError> {
    if !body.is_object() {
        return None;
    }
    let parsed: ErrorBody = serde_json::from_value(body.clone()).ok()?;
    if parsed.error.is_null() {
        return None;
    }

    let message = match &parsed.error {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let code = match parsed.code {
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };

    Some(ServerError::new(&code, &message))
}
