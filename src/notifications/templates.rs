//! Message bodies for every notification, as email (text + HTML) and as a
//! short WhatsApp text.

use chrono::NaiveDate;

use crate::db::{Bill, BillStatus, NotificationKind};

/// A notification with everything needed to render it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Verification {
        name: String,
        link: String,
        ttl_hours: i64,
    },
    PasswordReset {
        name: String,
        link: String,
        ttl_minutes: i64,
    },
    HouseholdInvite {
        household_name: String,
        inviter_name: String,
        invite_code: String,
        join_link: String,
    },
    MemberJoined {
        household_name: String,
        member_name: String,
    },
    BillCreated {
        household_name: String,
        title: String,
        amount: String,
        due_date: String,
        created_by: String,
    },
    BillDueReminder {
        title: String,
        amount: String,
        due_date: String,
        overdue: bool,
        link: String,
    },
    BillPaid {
        title: String,
        amount: String,
        paid_by: String,
    },
}

impl Notification {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Notification::Verification { .. } => NotificationKind::Verification,
            Notification::PasswordReset { .. } => NotificationKind::PasswordReset,
            Notification::HouseholdInvite { .. } => NotificationKind::HouseholdInvite,
            Notification::MemberJoined { .. } => NotificationKind::MemberJoined,
            Notification::BillCreated { .. } => NotificationKind::BillCreated,
            Notification::BillDueReminder { .. } => NotificationKind::BillDueReminder,
            Notification::BillPaid { .. } => NotificationKind::BillPaid,
        }
    }

    /// Account mail goes out regardless of opt-ins and only by email
    pub fn is_transactional(&self) -> bool {
        matches!(
            self,
            Notification::Verification { .. }
                | Notification::PasswordReset { .. }
                | Notification::HouseholdInvite { .. }
        )
    }

    pub fn subject(&self) -> String {
        match self {
            Notification::Verification { .. } => "Verify your Hearth email".to_string(),
            Notification::PasswordReset { .. } => "Reset your Hearth password".to_string(),
            Notification::HouseholdInvite { household_name, .. } => {
                format!("You're invited to join {} on Hearth", household_name)
            }
            Notification::MemberJoined {
                household_name,
                member_name,
            } => format!("{} joined {}", member_name, household_name),
            Notification::BillCreated { title, .. } => format!("New bill: {}", title),
            Notification::BillDueReminder { title, overdue, .. } => {
                if *overdue {
                    format!("Overdue: {}", title)
                } else {
                    format!("Reminder: {} is due soon", title)
                }
            }
            Notification::BillPaid { title, .. } => format!("Paid: {}", title),
        }
    }

    /// Plain-text body, also used for WhatsApp
    pub fn text(&self) -> String {
        match self {
            Notification::Verification {
                name,
                link,
                ttl_hours,
            } => format!(
                "Hi {},\n\nWelcome to Hearth. Confirm your email address by opening this link:\n\n{}\n\nThe link expires in {} hours. If you did not sign up, you can ignore this email.",
                name, link, ttl_hours
            ),
            Notification::PasswordReset {
                name,
                link,
                ttl_minutes,
            } => format!(
                "Hi {},\n\nSomeone asked to reset your Hearth password. Open this link to choose a new one:\n\n{}\n\nThe link expires in {} minutes. If it wasn't you, nothing changes.",
                name, link, ttl_minutes
            ),
            Notification::HouseholdInvite {
                household_name,
                inviter_name,
                invite_code,
                join_link,
            } => format!(
                "{} invited you to share bills and expenses in \"{}\" on Hearth.\n\nInvite code: {}\n\nJoin here: {}",
                inviter_name, household_name, invite_code, join_link
            ),
            Notification::MemberJoined {
                household_name,
                member_name,
            } => format!("{} has joined your household \"{}\".", member_name, household_name),
            Notification::BillCreated {
                household_name,
                title,
                amount,
                due_date,
                created_by,
            } => format!(
                "{} added a bill to \"{}\": {} for {}, due {}.",
                created_by, household_name, title, amount, due_date
            ),
            Notification::BillDueReminder {
                title,
                amount,
                due_date,
                overdue,
                link,
            } => {
                let when = if *overdue { "was due" } else { "is due" };
                format!("{} ({}) {} on {}.\n\n{}", title, amount, when, due_date, link)
            }
            Notification::BillPaid {
                title,
                amount,
                paid_by,
            } => format!("{} paid {} ({}).", paid_by, title, amount),
        }
    }

    pub fn html(&self) -> String {
        let (heading, body, action) = match self {
            Notification::Verification { name, link, ttl_hours } => (
                "Confirm your email".to_string(),
                format!(
                    "<p>Hi {},</p><p>Welcome to Hearth. Confirm your email address to get started. The link expires in {} hours.</p>",
                    html_escape(name),
                    ttl_hours
                ),
                Some(("Verify email", link.as_str())),
            ),
            Notification::PasswordReset { name, link, ttl_minutes } => (
                "Reset your password".to_string(),
                format!(
                    "<p>Hi {},</p><p>Someone asked to reset your password. The link expires in {} minutes. If it wasn't you, ignore this email.</p>",
                    html_escape(name),
                    ttl_minutes
                ),
                Some(("Choose a new password", link.as_str())),
            ),
            Notification::HouseholdInvite {
                household_name,
                inviter_name,
                invite_code,
                join_link,
            } => (
                "You're invited".to_string(),
                format!(
                    "<p><strong>{}</strong> invited you to join <strong>{}</strong>.</p><p class=\"code\">{}</p>",
                    html_escape(inviter_name),
                    html_escape(household_name),
                    html_escape(invite_code)
                ),
                Some(("Join household", join_link.as_str())),
            ),
            Notification::BillDueReminder { link, .. } => (
                self.subject(),
                format!("<p>{}</p>", html_escape(&self.text_without_link())),
                Some(("View bill", link.as_str())),
            ),
            _ => (self.subject(), format!("<p>{}</p>", html_escape(&self.text())), None),
        };

        let button = action
            .map(|(label, href)| {
                format!(
                    "<p><a class=\"button\" href=\"{}\">{}</a></p><p class=\"muted\">Or paste this link into your browser: {}</p>",
                    html_escape(href),
                    label,
                    html_escape(href)
                )
            })
            .unwrap_or_default();

        format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>{heading}</title>
    <style>
        body {{ font-family: -apple-system, 'Segoe UI', Roboto, Arial, sans-serif; background: #f7f5f2; margin: 0; }}
        .card {{ max-width: 520px; margin: 32px auto; background: #fff; border-radius: 8px; padding: 28px; }}
        h1 {{ font-size: 20px; color: #7c2d12; margin-top: 0; }}
        p {{ color: #374151; line-height: 1.6; }}
        .button {{ display: inline-block; background: #c2410c; color: #fff; padding: 10px 18px; border-radius: 6px; text-decoration: none; }}
        .code {{ font-family: monospace; font-size: 22px; letter-spacing: 4px; }}
        .muted {{ color: #9ca3af; font-size: 12px; }}
    </style>
</head>
<body>
    <div class="card">
        <h1>{heading}</h1>
        {body}
        {button}
    </div>
</body>
</html>"#,
            heading = html_escape(&heading),
            body = body,
            button = button,
        )
    }

    fn text_without_link(&self) -> String {
        match self {
            Notification::BillDueReminder {
                title,
                amount,
                due_date,
                overdue,
                ..
            } => {
                let when = if *overdue { "was due" } else { "is due" };
                format!("{} ({}) {} on {}.", title, amount, when, due_date)
            }
            other => other.text(),
        }
    }
}

impl Notification {
    /// Due or overdue reminder for a bill, linking to it in the web app
    pub fn bill_reminder(bill: &Bill, currency: &str, frontend_url: &str, today: NaiveDate) -> Self {
        Notification::BillDueReminder {
            title: bill.title.clone(),
            amount: format_amount(bill.amount_cents, currency),
            due_date: bill.due_date.clone(),
            overdue: bill.effective_status(today) == BillStatus::Overdue,
            link: format!("{}/bills/{}", frontend_url.trim_end_matches('/'), bill.id),
        }
    }
}

/// Amount in major units with the currency code, e.g. `GHS 1,250.50`
pub fn format_amount(amount_cents: i64, currency: &str) -> String {
    let sign = if amount_cents < 0 { "-" } else { "" };
    let cents = amount_cents.unsigned_abs();
    let whole = (cents / 100).to_string();
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("{} {}{}.{:02}", currency, sign, grouped, cents % 100)
}

pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("<script>"), "&lt;script&gt;");
        assert_eq!(html_escape("Tom & Jerry's"), "Tom &amp; Jerry&#39;s");
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(0, "USD"), "USD 0.00");
        assert_eq!(format_amount(125_050, "GHS"), "GHS 1,250.50");
        assert_eq!(format_amount(100_000_000, "USD"), "USD 1,000,000.00");
        assert_eq!(format_amount(-505, "EUR"), "EUR -5.05");
    }

    #[test]
    fn test_invite_renders_escaped_html() {
        let n = Notification::HouseholdInvite {
            household_name: "<Mensah> Home".into(),
            inviter_name: "Ama".into(),
            invite_code: "ABCD2345".into(),
            join_link: "http://localhost:3000/join?code=ABCD2345".into(),
        };
        assert!(n.is_transactional());
        assert_eq!(n.kind(), NotificationKind::HouseholdInvite);
        let html = n.html();
        assert!(html.contains("&lt;Mensah&gt; Home"));
        assert!(!html.contains("<Mensah>"));
        assert!(html.contains("ABCD2345"));
        assert!(n.text().contains("Invite code: ABCD2345"));
    }

    #[test]
    fn test_reminder_wording() {
        let mut n = Notification::BillDueReminder {
            title: "Rent".into(),
            amount: "USD 900.00".into(),
            due_date: "2024-06-01".into(),
            overdue: false,
            link: "http://localhost:3000/bills/1".into(),
        };
        assert!(!n.is_transactional());
        assert_eq!(n.subject(), "Reminder: Rent is due soon");
        assert!(n.text().contains("is due on 2024-06-01"));

        if let Notification::BillDueReminder { overdue, .. } = &mut n {
            *overdue = true;
        }
        assert_eq!(n.subject(), "Overdue: Rent");
        assert!(n.html().contains("View bill"));
    }
}
