use serde::{
    Deserialize,
    Serialize,
};
use std::fmt;

const HOST_PLACEHOLDER: &str = "{host}";

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Locale {
    #[default]
    #[serde(rename = "en")]
    En,
    #[serde(rename = "ja")]
    Ja,
    #[serde(rename = "th")]
    Th,
    #[serde(rename = "zh-TW")]
    ZhTw,
}

impl Locale {
    /// Maps a browser language tag (`ja-JP`, `zh-Hant-TW`, `th`, ...) onto a
    /// supported locale. Tags are matched case-insensitively on the primary
    /// subtag; Chinese is only supported in its traditional script.
    pub fn from_language_tag(tag: &str) -> Option<Self> {
        let normalized = tag.trim().replace('_', "-").to_ascii_lowercase();
        let mut subtags = normalized.split('-');
        match subtags.next()? {
            "en" => Some(Locale::En),
            "ja" => Some(Locale::Ja),
            "th" => Some(Locale::Th),
            "zh" => {
                let rest: Vec<&str> = subtags.collect();
                let traditional = rest
                    .iter()
                    .any(|subtag| matches!(*subtag, "hant" | "tw" | "hk" | "mo"));
                traditional.then_some(Locale::ZhTw)
            }
            _ => None,
        }
    }

    pub fn resolve(tag: &str, fallback: Locale) -> Self {
        Self::from_language_tag(tag).unwrap_or(fallback)
    }

    pub fn tag(self) -> &'static str {
        match self {
            Locale::En => "en",
            Locale::Ja => "ja",
            Locale::Th => "th",
            Locale::ZhTw => "zh-TW",
        }
    }

    /// User-facing text for `reason`, naming the host app as `host_name`.
    pub fn message(self, reason: FatalReason, host_name: &str) -> String {
        self.template(reason).replace(HOST_PLACEHOLDER, host_name)
    }

    fn template(self, reason: FatalReason) -> &'static str {
        use FatalReason::*;
        match (self, reason) {
            (Locale::En, InitializationFailed) => "Failed to start the app. Please reload.",
            (Locale::En, HostLoginRequired) => "Please log in through {host} to continue.",
            (Locale::En, NetworkError) => {
                "Network error. Check your connection and reload."
            }
            (Locale::En, AuthenticationFailed) => "Login failed. Please reload and try again.",
            (Locale::En, RetryRequired) => "Something went wrong. Please reload.",

            (Locale::Ja, InitializationFailed) => {
                "アプリの起動に失敗しました。再読み込みしてください。"
            }
            (Locale::Ja, HostLoginRequired) => "{host}からログインしてください。",
            (Locale::Ja, NetworkError) => {
                "通信エラーが発生しました。接続を確認して再読み込みしてください。"
            }
            (Locale::Ja, AuthenticationFailed) => {
                "ログインに失敗しました。再読み込みしてもう一度お試しください。"
            }
            (Locale::Ja, RetryRequired) => "エラーが発生しました。再読み込みしてください。",

            (Locale::Th, InitializationFailed) => "ไม่สามารถเริ่มแอปได้ กรุณาโหลดใหม่",
            (Locale::Th, HostLoginRequired) => "กรุณาเข้าสู่ระบบผ่าน {host}",
            (Locale::Th, NetworkError) => {
                "เครือข่ายขัดข้อง กรุณาตรวจสอบการเชื่อมต่อแล้วโหลดใหม่"
            }
            (Locale::Th, AuthenticationFailed) => "เข้าสู่ระบบไม่สำเร็จ กรุณาโหลดใหม่แล้วลองอีกครั้ง",
            (Locale::Th, RetryRequired) => "เกิดข้อผิดพลาด กรุณาโหลดใหม่",

            (Locale::ZhTw, InitializationFailed) => "應用程式啟動失敗，請重新載入。",
            (Locale::ZhTw, HostLoginRequired) => "請透過 {host} 登入。",
            (Locale::ZhTw, NetworkError) => "網路錯誤，請確認連線後重新載入。",
            (Locale::ZhTw, AuthenticationFailed) => "登入失敗，請重新載入後再試一次。",
            (Locale::ZhTw, RetryRequired) => "發生錯誤，請重新載入。",
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Why a bootstrap run ended on the error screen.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalReason {
    InitializationFailed,
    HostLoginRequired,
    NetworkError,
    AuthenticationFailed,
    RetryRequired,
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn from_language_tag__matches_primary_subtag() {
        assert_eq!(Locale::from_language_tag("ja-JP"), Some(Locale::Ja));
        assert_eq!(Locale::from_language_tag("EN-us"), Some(Locale::En));
        assert_eq!(Locale::from_language_tag("th"), Some(Locale::Th));
        assert_eq!(Locale::from_language_tag("zh_TW"), Some(Locale::ZhTw));
        assert_eq!(Locale::from_language_tag("zh-Hant-HK"), Some(Locale::ZhTw));
    }

    #[test]
    fn from_language_tag__rejects_unsupported_tags() {
        assert_eq!(Locale::from_language_tag("zh-CN"), None);
        assert_eq!(Locale::from_language_tag("fr-FR"), None);
        assert_eq!(Locale::from_language_tag(""), None);
    }

    #[test]
    fn resolve__falls_back_to_default() {
        assert_eq!(Locale::resolve("ko-KR", Locale::Ja), Locale::Ja);
    }

    #[test]
    fn message__every_locale_has_every_reason() {
        let reasons = [
            FatalReason::InitializationFailed,
            FatalReason::HostLoginRequired,
            FatalReason::NetworkError,
            FatalReason::AuthenticationFailed,
            FatalReason::RetryRequired,
        ];
        for locale in [Locale::En, Locale::Ja, Locale::Th, Locale::ZhTw] {
            for reason in reasons {
                let message = locale.message(reason, "LINE");
                assert!(!message.is_empty());
                assert!(!message.contains(HOST_PLACEHOLDER));
            }
        }
    }

    #[test]
    fn message__names_the_configured_host() {
        // given
        let host = "Mini Host";

        // when
        let english = Locale::En.message(FatalReason::HostLoginRequired, host);
        let taiwanese = Locale::ZhTw.message(FatalReason::HostLoginRequired, host);

        // then
        assert_eq!(english, "Please log in through Mini Host to continue.");
        assert_eq!(taiwanese, "請透過 Mini Host 登入。");
        assert!(!english.contains("LINE"));
    }
}
