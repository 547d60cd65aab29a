//! Password strength gate for escrow uploads.
//!
//! Scores come from `zxcvbn` on a 0-4 scale. Only the top two tiers may
//! protect a key backup.

use serde::Serialize;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Five-tier password strength
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PasswordStrength {
    /// Score 0
    VeryWeak,
    /// Score 1
    Weak,
    /// Score 2
    Fair,
    /// Score 3
    Strong,
    /// Score 4
    VeryStrong,
}

impl PasswordStrength {
    /// Map an estimator score, clamping anything above 4
    pub fn from_score(score: u8) -> Self {
        match score {
            0 => PasswordStrength::VeryWeak,
            1 => PasswordStrength::Weak,
            2 => PasswordStrength::Fair,
            3 => PasswordStrength::Strong,
            _ => PasswordStrength::VeryStrong,
        }
    }

    /// Estimator score (0-4)
    pub fn score(self) -> u8 {
        self as u8
    }

    /// Whether this tier may protect an escrow upload
    pub fn permits_escrow(self) -> bool {
        self >= PasswordStrength::Strong
    }
}

/// Strength plus the estimator's feedback for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PasswordReport {
    /// Strength tier
    pub strength: PasswordStrength,
    /// Main problem with the password, if any
    pub warning: Option<String>,
    /// Hints for a better password
    pub suggestions: Vec<String>,
}

/// Rate a password
///
/// A blank password is the weakest tier.
pub fn evaluate(password: &str) -> PasswordReport {
    match zxcvbn::zxcvbn(password, &[]) {
        Ok(entropy) => {
            let (warning, suggestions) = entropy
                .feedback()
                .as_ref()
                .map(|feedback| {
                    (
                        feedback.warning().map(|w| w.to_string()),
                        feedback
                            .suggestions()
                            .iter()
                            .map(|s| s.to_string())
                            .collect::<Vec<_>>(),
                    )
                })
                .unwrap_or_default();

            PasswordReport {
                strength: PasswordStrength::from_score(entropy.score()),
                warning,
                suggestions,
            }
        }
        Err(_) => PasswordReport {
            strength: PasswordStrength::VeryWeak,
            warning: None,
            suggestions: Vec::new(),
        },
    }
}

/// Rate a password on the blocking pool
pub async fn evaluate_async(password: String) -> Result<PasswordReport> {
    let password = Zeroizing::new(password);
    Ok(tokio::task::spawn_blocking(move || evaluate(&password)).await?)
}

/// Fail with `WeakPassword` unless the password reaches the top two tiers
pub async fn ensure_escrow_allowed(password: &str) -> Result<PasswordReport> {
    let report = evaluate_async(password.to_string()).await?;
    if !report.strength.permits_escrow() {
        tracing::debug!(
            "Rejected escrow password at strength {:?}",
            report.strength
        );
        return Err(Error::WeakPassword {
            score: report.strength.score(),
        });
    }
    Ok(report)
}
