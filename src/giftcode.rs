//! Client for the game's gift-code redemption API.
//!
//! Every request is an urlencoded form signed by MD5 over the sorted fields with the shared secret
//! appended.  A redemption first looks the player up (the API refuses codes for players it has not
//! "logged in") and then submits the code.

use crate::{config, log_error, log_internal};
use md5::{Digest, Md5};
use serenity::all::UserId;
use std::{collections::BTreeMap, time::Duration};

/// How a single redemption attempt ended, according to the API
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedeemOutcome {
    Success,
    AlreadyRedeemed,
    CodeNotFound,
    Other(String),
}

impl RedeemOutcome {
    fn label(&self) -> String {
        match self {
            RedeemOutcome::Success => "\u{2705} Redeemed".to_owned(),
            RedeemOutcome::AlreadyRedeemed => "\u{2139}\u{FE0F} Already redeemed".to_owned(),
            RedeemOutcome::CodeNotFound => "\u{274C} Code not found".to_owned(),
            RedeemOutcome::Other(msg) => format!("\u{26A0}\u{FE0F} {}", msg),
        }
    }
}

#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum GiftCodeError {
    #[display("Gift code request failed: {}", source)]
    Request { source: reqwest::Error },
    #[display("Gift code API answered with status {}", status)]
    Status {
        #[error(not(source))]
        status: reqwest::StatusCode,
    },
    #[display("Player lookup rejected: {}", msg)]
    PlayerRejected { msg: String },
    #[display("No gift code API secret is configured")]
    MissingSecret,
}

impl From<reqwest::Error> for GiftCodeError {
    fn from(source: reqwest::Error) -> Self {
        GiftCodeError::Request { source }
    }
}

/// Sort `fields`, join them as `k=v&...`, and prepend the MD5 signature over that string with
/// `secret` appended.
pub fn sign_form(fields: &BTreeMap<&str, String>, secret: &str) -> String {
    let joined = fields
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&");
    let digest = Md5::digest(format!("{}{}", joined, secret).as_bytes());
    format!("sign={:x}&{}", digest, joined)
}

/// Gift codes are plain letters and digits.  Anything else would corrupt the signed form body.
pub fn is_valid_code(code: &str) -> bool {
    !code.is_empty() && code.len() <= 64 && code.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Map the API's `msg` and `err_code` pair to an outcome.
pub fn classify(msg: &str, err_code: Option<i64>) -> RedeemOutcome {
    match (msg, err_code) {
        ("SUCCESS", _) | (_, Some(20000)) => RedeemOutcome::Success,
        ("RECEIVED.", _) | (_, Some(40008)) => RedeemOutcome::AlreadyRedeemed,
        ("SAME TYPE EXCHANGE.", _) | (_, Some(40011)) => RedeemOutcome::AlreadyRedeemed,
        ("CDK NOT FOUND.", _) | (_, Some(40014)) => RedeemOutcome::CodeNotFound,
        (msg, _) => RedeemOutcome::Other(msg.trim().to_owned()),
    }
}

#[derive(Debug, serde::Deserialize)]
struct ApiResponse {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    err_code: serde_json::Value,
    #[serde(default)]
    data: serde_json::Value,
}

impl ApiResponse {
    /// `err_code` shows up as a number, a numeric string, or an empty string
    fn err_code(&self) -> Option<i64> {
        match &self.err_code {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    fn nickname(&self) -> Option<String> {
        self.data
            .get("nickname")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
    }
}

/// One mapped player's part of a redemption
#[derive(Debug)]
pub struct RedeemEntry {
    pub member: UserId,
    pub player_id: String,
    pub nickname: Option<String>,
    pub outcome: Result<RedeemOutcome, GiftCodeError>,
}

/// Every player's outcome for one gift code
#[derive(Debug)]
pub struct RedeemReport {
    pub code: String,
    pub entries: Vec<RedeemEntry>,
}

impl RedeemReport {
    pub fn count(&self, outcome: &RedeemOutcome) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.outcome.as_ref().ok() == Some(outcome))
            .count()
    }

    fn lines(&self) -> Vec<String> {
        let mut lines = vec![format!("\u{1F381} Gift code `{}`", self.code)];
        lines.extend(self.entries.iter().map(|entry| {
            let who = match &entry.nickname {
                Some(nickname) => format!("{} ({})", nickname, entry.player_id),
                None => entry.player_id.clone(),
            };
            let outcome = match &entry.outcome {
                Ok(outcome) => outcome.label(),
                Err(e) => format!("\u{26A0}\u{FE0F} {}", e),
            };
            format!("<@{}> {}: {}", entry.member, who, outcome)
        }));
        lines.push(format!(
            "{} redeemed, {} already redeemed, {} other",
            self.count(&RedeemOutcome::Success),
            self.count(&RedeemOutcome::AlreadyRedeemed),
            self.entries.len()
                - self.count(&RedeemOutcome::Success)
                - self.count(&RedeemOutcome::AlreadyRedeemed),
        ));
        lines
    }

    /// The report as Discord messages no longer than `limit` bytes each.  Lines are never split.
    pub fn render(&self, limit: usize) -> Vec<String> {
        let mut messages: Vec<String> = Vec::new();
        for line in self.lines() {
            match messages.last_mut() {
                Some(current) if current.len() + 1 + line.len() <= limit => {
                    current.push('\n');
                    current.push_str(&line);
                }
                _ => messages.push(line),
            }
        }
        messages
    }
}

pub struct GiftCodeClient {
    client: reqwest::Client,
    api_url: String,
    secret: String,
    player_delay: Duration,
}

impl GiftCodeClient {
    pub fn new(cfg: &config::GiftCode) -> Result<Self, GiftCodeError> {
        if cfg.secret.is_empty() {
            return Err(GiftCodeError::MissingSecret);
        }
        let client = reqwest::Client::builder().timeout(cfg.timeout()).build()?;
        Ok(Self {
            client,
            api_url: cfg.api_url.trim_end_matches('/').to_owned(),
            secret: cfg.secret.clone(),
            player_delay: Duration::from_millis(cfg.player_delay_ms),
        })
    }

    async fn post(&self, endpoint: &str, fields: &BTreeMap<&str, String>) -> Result<ApiResponse, GiftCodeError> {
        let url = format!("{}/{}", self.api_url, endpoint);
        let response = self
            .client
            .post(&url)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(sign_form(fields, &self.secret))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GiftCodeError::Status { status });
        }
        Ok(response.json::<ApiResponse>().await?)
    }

    fn now_millis() -> String {
        chrono::Utc::now().timestamp_millis().to_string()
    }

    /// Look the player up and return their nickname, if the API shares one.
    async fn login(&self, player_id: &str) -> Result<Option<String>, GiftCodeError> {
        let fields = BTreeMap::from([("fid", player_id.to_owned()), ("time", Self::now_millis())]);
        let response = self.post("player", &fields).await?;
        if response.code.is_some_and(|code| code != 0) {
            return Err(GiftCodeError::PlayerRejected { msg: response.msg });
        }
        Ok(response.nickname())
    }

    async fn redeem_one(&self, code: &str, player_id: &str) -> Result<RedeemOutcome, GiftCodeError> {
        let fields = BTreeMap::from([
            ("cdk", code.to_owned()),
            ("fid", player_id.to_owned()),
            ("time", Self::now_millis()),
        ]);
        let response = self.post("gift_code", &fields).await?;
        Ok(classify(&response.msg, response.err_code()))
    }

    /// Redeem `code` for every `(member, player id)` pair, pausing between players.
    pub async fn redeem(&self, code: &str, players: &[(UserId, String)]) -> RedeemReport {
        let mut entries = Vec::with_capacity(players.len());

        for (i, (member, player_id)) in players.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.player_delay).await;
            }

            let (nickname, outcome) = match self.login(player_id).await {
                Ok(nickname) => (nickname, self.redeem_one(code, player_id).await),
                Err(e) => (None, Err(e)),
            };
            match &outcome {
                Ok(outcome) => {
                    log_internal!("Gift code {} for player {}: {:?}", code, player_id, outcome)
                }
                Err(e) => log_error!("Gift code {} for player {}: {}", code, player_id, e),
            }

            entries.push(RedeemEntry {
                member: *member,
                player_id: player_id.clone(),
                nickname,
                outcome,
            });
        }

        RedeemReport {
            code: code.to_owned(),
            entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_that_would_break_the_form_are_invalid() {
        assert!(is_valid_code("VIP777"));
        assert!(is_valid_code("wos2024"));
        assert!(!is_valid_code(""));
        assert!(!is_valid_code("A&fid=1"));
        assert!(!is_valid_code("A=B"));
        assert!(!is_valid_code("A+B"));
        assert!(!is_valid_code("ÄBC"));
        assert!(!is_valid_code(&"A".repeat(65)));
    }

    #[test]
    fn signature_covers_sorted_fields_and_secret() {
        let fields = BTreeMap::from([
            ("time", "1700000000000".to_owned()),
            ("fid", "12345".to_owned()),
            ("cdk", "HELLO".to_owned()),
        ]);
        assert_eq!(
            sign_form(&fields, "secret"),
            "sign=17f73814f2469f887c960ca9d4f6beed&cdk=HELLO&fid=12345&time=1700000000000"
        );

        let fields = BTreeMap::from([
            ("fid", "12345".to_owned()),
            ("time", "1700000000000".to_owned()),
        ]);
        assert_eq!(
            sign_form(&fields, "secret"),
            "sign=0c00a44f108fbeae78ecab76f20c933a&fid=12345&time=1700000000000"
        );
    }

    #[test]
    fn classification() {
        assert_eq!(classify("SUCCESS", Some(20000)), RedeemOutcome::Success);
        assert_eq!(classify("RECEIVED.", Some(40008)), RedeemOutcome::AlreadyRedeemed);
        assert_eq!(
            classify("SAME TYPE EXCHANGE.", Some(40011)),
            RedeemOutcome::AlreadyRedeemed
        );
        assert_eq!(classify("CDK NOT FOUND.", Some(40014)), RedeemOutcome::CodeNotFound);
        // either half of the pair is enough
        assert_eq!(classify("", Some(40014)), RedeemOutcome::CodeNotFound);
        assert_eq!(classify("RECEIVED.", None), RedeemOutcome::AlreadyRedeemed);
        assert_eq!(
            classify("TIME ERROR.", Some(40007)),
            RedeemOutcome::Other("TIME ERROR.".to_owned())
        );
    }

    #[test]
    fn err_code_shapes() {
        let parse = |json: &str| serde_json::from_str::<ApiResponse>(json).unwrap().err_code();
        assert_eq!(parse(r#"{"msg": "SUCCESS", "err_code": 20000}"#), Some(20000));
        assert_eq!(parse(r#"{"msg": "SUCCESS", "err_code": "40008"}"#), Some(40008));
        assert_eq!(parse(r#"{"msg": "SUCCESS", "err_code": ""}"#), None);
        assert_eq!(parse(r#"{"msg": "SUCCESS"}"#), None);
    }

    #[test]
    fn player_nickname_from_data() {
        let response: ApiResponse =
            serde_json::from_str(r#"{"code": 0, "msg": "success", "data": {"nickname": "Frosty"}}"#)
                .unwrap();
        assert_eq!(response.nickname().as_deref(), Some("Frosty"));
    }

    fn report() -> RedeemReport {
        let entry = |member: u64, outcome| RedeemEntry {
            member: UserId::new(member),
            player_id: format!("{}00", member),
            nickname: None,
            outcome: Ok(outcome),
        };
        RedeemReport {
            code: "HELLO".to_owned(),
            entries: vec![
                entry(1, RedeemOutcome::Success),
                entry(2, RedeemOutcome::AlreadyRedeemed),
                entry(3, RedeemOutcome::CodeNotFound),
                RedeemEntry {
                    member: UserId::new(4),
                    player_id: "400".to_owned(),
                    nickname: Some("Frosty".to_owned()),
                    outcome: Err(GiftCodeError::PlayerRejected {
                        msg: "role not exist.".to_owned(),
                    }),
                },
            ],
        }
    }

    #[test]
    fn report_aggregates_players() {
        let report = report();
        let messages = report.render(2000);
        assert_eq!(messages.len(), 1);

        let text = &messages[0];
        assert!(text.starts_with("\u{1F381} Gift code `HELLO`"));
        assert!(text.contains("<@1> 100: \u{2705} Redeemed"));
        assert!(text.contains("<@3> 300: \u{274C} Code not found"));
        assert!(text.contains("<@4> Frosty (400)"));
        assert!(text.ends_with("1 redeemed, 1 already redeemed, 2 other"));
    }

    #[test]
    fn long_report_splits_on_lines() {
        let report = report();
        let messages = report.render(60);
        assert!(messages.len() > 1);
        for message in &messages {
            assert!(message.len() <= 60 || !message.contains('\n'));
        }
        assert_eq!(messages.join("\n"), report.render(2000)[0]);
    }

    #[test]
    fn client_requires_secret() {
        let cfg = config::GiftCode {
            secret: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            GiftCodeClient::new(&cfg),
            Err(GiftCodeError::MissingSecret)
        ));
    }
}
