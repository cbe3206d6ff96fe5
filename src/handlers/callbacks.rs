use crate::catalog::{Category, Gender};

/// Everything an inline button can ask for.
///
/// Tokens are `|`-separated and stay under Telegram's 64 byte limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    Home,
    Tariffs,
    Buy(String),
    CheckPayment(String),
    PhotosDone,
    TrainingStatus,
    Generations,
    PickGender(Gender),
    PickCategory(Gender, Category),
    Generate(Gender, Category, usize),
    Examples,
    Support,
    Account,
    Referral,
    ReferralIncome,
    ReferralPayout,
}

impl CallbackAction {
    pub fn parse(data: &str) -> Option<Self> {
        let mut parts = data.trim().split('|');
        let head = parts.next()?;
        let action = match head {
            "home" | "back_home" => CallbackAction::Home,
            "try" => CallbackAction::Tariffs,
            "buy" => CallbackAction::Buy(non_empty(parts.next())?),
            "chk" => CallbackAction::CheckPayment(non_empty(parts.next())?),
            "photos_done" => CallbackAction::PhotosDone,
            "train_status" => CallbackAction::TrainingStatus,
            "gen_menu" => CallbackAction::Generations,
            "g" => CallbackAction::PickGender(Gender::from_token(parts.next()?)?),
            "c" => CallbackAction::PickCategory(
                Gender::from_token(parts.next()?)?,
                Category::from_token(parts.next()?)?,
            ),
            "p" => CallbackAction::Generate(
                Gender::from_token(parts.next()?)?,
                Category::from_token(parts.next()?)?,
                parts.next()?.parse().ok()?,
            ),
            "examples" => CallbackAction::Examples,
            "support" => CallbackAction::Support,
            "account" => CallbackAction::Account,
            "ref_menu" => CallbackAction::Referral,
            "ref_income" => CallbackAction::ReferralIncome,
            "ref_payout" => CallbackAction::ReferralPayout,
            _ => return None,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(action)
    }

    pub fn token(&self) -> String {
        match self {
            CallbackAction::Home => "home".to_string(),
            CallbackAction::Tariffs => "try".to_string(),
            CallbackAction::Buy(tag) => format!("buy|{tag}"),
            CallbackAction::CheckPayment(payment_id) => format!("chk|{payment_id}"),
            CallbackAction::PhotosDone => "photos_done".to_string(),
            CallbackAction::TrainingStatus => "train_status".to_string(),
            CallbackAction::Generations => "gen_menu".to_string(),
            CallbackAction::PickGender(gender) => format!("g|{}", gender.token()),
            CallbackAction::PickCategory(gender, category) => {
                format!("c|{}|{}", gender.token(), category.token())
            }
            CallbackAction::Generate(gender, category, index) => {
                format!("p|{}|{}|{}", gender.token(), category.token(), index)
            }
            CallbackAction::Examples => "examples".to_string(),
            CallbackAction::Support => "support".to_string(),
            CallbackAction::Account => "account".to_string(),
            CallbackAction::Referral => "ref_menu".to_string(),
            CallbackAction::ReferralIncome => "ref_income".to_string(),
            CallbackAction::ReferralPayout => "ref_payout".to_string(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CallbackAction::Home => "home",
            CallbackAction::Tariffs => "tariffs",
            CallbackAction::Buy(_) => "buy",
            CallbackAction::CheckPayment(_) => "check_payment",
            CallbackAction::PhotosDone => "photos_done",
            CallbackAction::TrainingStatus => "training_status",
            CallbackAction::Generations => "generations",
            CallbackAction::PickGender(_) => "pick_gender",
            CallbackAction::PickCategory(..) => "pick_category",
            CallbackAction::Generate(..) => "generate",
            CallbackAction::Examples => "examples",
            CallbackAction::Support => "support",
            CallbackAction::Account => "account",
            CallbackAction::Referral => "referral",
            CallbackAction::ReferralIncome => "referral_income",
            CallbackAction::ReferralPayout => "referral_payout",
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_parameterized_tokens() {
        assert_eq!(
            CallbackAction::parse("p|f|cine|2"),
            Some(CallbackAction::Generate(Gender::Female, Category::Cinematic, 2))
        );
        assert_eq!(
            CallbackAction::parse("chk|2d8b7c1e-000f-5000-8000-1a2b3c4d5e6f"),
            Some(CallbackAction::CheckPayment(
                "2d8b7c1e-000f-5000-8000-1a2b3c4d5e6f".to_string()
            ))
        );
        assert_eq!(CallbackAction::parse("back_home"), Some(CallbackAction::Home));
    }

    #[test]
    fn stale_or_malformed_tokens_are_rejected() {
        assert_eq!(CallbackAction::parse("p_ny"), None);
        assert_eq!(CallbackAction::parse("p|m|space|0"), None);
        assert_eq!(CallbackAction::parse("p|m|city|x"), None);
        assert_eq!(CallbackAction::parse("buy|"), None);
        assert_eq!(CallbackAction::parse("home|extra"), None);
        assert_eq!(CallbackAction::parse(""), None);
    }

    #[test]
    fn tokens_fit_telegram_callback_limit() {
        let longest = CallbackAction::CheckPayment("2d8b7c1e-000f-5000-8000-1a2b3c4d5e6f".to_string());
        assert!(longest.token().len() <= 64);
        let token = CallbackAction::Generate(Gender::Male, Category::Business, 12).token();
        assert_eq!(CallbackAction::parse(&token), Some(CallbackAction::Generate(Gender::Male, Category::Business, 12)));
    }
}
