//! Plan listing and subscription administration
//!
//! The text renderers here are shared by the CLI and the bot.

use chrono::Utc;

use crate::config::Config;
use crate::error::Result;
use crate::export::format_number;
use crate::subscription::{open_or_reset, Access, StoreStats, Subscription, UserStats, CURRENCY, PLANS};

pub fn plans_text() -> String {
    let mut lines = vec!["Available plans:".to_string()];
    lines.extend(PLANS.iter().map(|p| format!("- {}", p.describe())));
    lines.push("Ask an administrator to activate a plan.".to_string());
    lines.join("\n")
}

pub fn access_text(access: &Access, admin: bool) -> String {
    if admin {
        return "Administrator: unlimited access".to_string();
    }
    match access {
        Access::Active { days_left } => format!("Subscription active, {} days left", days_left),
        Access::Expired { days_ago } => {
            format!("Subscription expired {} days ago, see /buy", days_ago)
        }
        Access::Missing => "No subscription, send /start to get a trial".to_string(),
    }
}

pub fn user_stats_text(stats: &UserStats) -> String {
    format!(
        "Jobs: {}\nCompleted: {}\nMembers collected: {}\nSuccess rate: {:.1}%",
        stats.total_jobs,
        stats.completed_jobs,
        format_number(stats.total_members),
        stats.success_rate()
    )
}

pub fn admin_text(stats: &StoreStats) -> String {
    format!(
        "Users: {}\nActive subscriptions: {}\nJobs: {} ({} completed)\nRevenue: {:.0} {} from {} sales",
        format_number(stats.users),
        format_number(stats.active_subscriptions),
        format_number(stats.total_jobs),
        format_number(stats.completed_jobs),
        stats.revenue,
        CURRENCY,
        stats.sales
    )
}

pub fn subscription_text(subscription: &Subscription) -> String {
    format!(
        "{} plan for {} until {}",
        subscription.plan,
        subscription.user_id,
        subscription.expires_at.format("%Y-%m-%d %H:%M UTC")
    )
}

pub fn plans() {
    println!("{}", plans_text());
}

pub fn grant(config: &Config, user_id: i64, plan: &str) -> Result<()> {
    let store = open_or_reset(config.store_path())?;
    let subscription = store.grant(user_id, plan, Utc::now())?;
    println!("Granted {}", subscription_text(&subscription));
    Ok(())
}

pub fn status(config: &Config, user_id: i64) -> Result<()> {
    let store = open_or_reset(config.store_path())?;
    let now = Utc::now();
    let access = store.check_access(user_id, config.is_admin(user_id), now)?;
    println!("{}", access_text(&access, config.is_admin(user_id)));
    if let Some(subscription) = store.active_subscription(user_id, now)? {
        println!("{}", subscription_text(&subscription));
    }
    println!("{}", user_stats_text(&store.user_stats(user_id)?));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plans_text_lists_every_plan() {
        let text = plans_text();
        for plan in PLANS {
            assert!(text.contains(plan.code), "{}", plan.code);
        }
        assert!(text.contains("5000 RUB"));
    }

    #[test]
    fn access_texts() {
        assert!(access_text(&Access::Active { days_left: 4 }, false).contains("4 days left"));
        assert!(access_text(&Access::Expired { days_ago: 2 }, false).contains("2 days ago"));
        assert!(access_text(&Access::Missing, false).contains("/start"));
        assert!(access_text(&Access::Missing, true).contains("unlimited"));
    }

    #[test]
    fn admin_text_formats_numbers() {
        let text = admin_text(&StoreStats {
            users: 1200,
            active_subscriptions: 3,
            total_jobs: 10,
            completed_jobs: 9,
            revenue: 1050.0,
            sales: 2,
        });
        assert!(text.contains("Users: 1,200"));
        assert!(text.contains("1050 RUB from 2 sales"));
    }
}
