//! Pacing plan
//!
//! Converts a claimed recipient batch into per-message send delays:
//! a fresh uniform inter-message delay per recipient, a batch break after
//! every B messages (B re-drawn per batch), and deterministic round-robin
//! sender assignment keyed by the persisted claim sequence so the
//! distribution is stable across tick retries.

use cadence_storage::models::CampaignSettings;
use cadence_storage::repository::QueuedSendPlan;
use rand::Rng;
use uuid::Uuid;

/// A recipient claimed by the current tick
#[derive(Debug, Clone, Copy)]
pub struct ClaimedRecipient {
    pub id: Uuid,
    pub seq: i32,
}

/// Delay range of one sender account
#[derive(Debug, Clone, Copy)]
pub struct AccountPacing {
    pub id: Uuid,
    pub min_delay_secs: u32,
    pub max_delay_secs: u32,
}

/// Build the send plan for a claimed batch. `accounts` must be non-empty
/// and ordered by their campaign position.
pub fn build_plan<R: Rng>(
    claimed: &[ClaimedRecipient],
    accounts: &[AccountPacing],
    settings: &CampaignSettings,
    rng: &mut R,
) -> Vec<QueuedSendPlan> {
    debug_assert!(!accounts.is_empty());

    let mut plans = Vec::with_capacity(claimed.len());
    let mut cum_delay: i64 = 0;
    let mut in_batch: u32 = 0;
    let mut batch_size = draw_batch_size(settings, rng);

    for (index, recipient) in claimed.iter().enumerate() {
        let account = accounts[recipient.seq as usize % accounts.len()];
        let last = index == claimed.len() - 1;

        if in_batch == batch_size && !last {
            cum_delay += settings.batch_delay_secs as i64;
            in_batch = 0;
            batch_size = draw_batch_size(settings, rng);
        } else {
            cum_delay += draw_message_delay(&account, settings, rng);
            in_batch += 1;
        }

        plans.push(QueuedSendPlan {
            recipient_id: recipient.id,
            smtp_account_id: account.id,
            send_delay_secs: cum_delay,
        });
    }

    plans
}

fn draw_batch_size<R: Rng>(settings: &CampaignSettings, rng: &mut R) -> u32 {
    if settings.batch_size_min >= settings.batch_size_max {
        settings.batch_size_min
    } else {
        rng.gen_range(settings.batch_size_min..=settings.batch_size_max)
    }
}

fn draw_message_delay<R: Rng>(
    account: &AccountPacing,
    settings: &CampaignSettings,
    rng: &mut R,
) -> i64 {
    if let Some(fixed) = settings.delay_between_emails {
        return fixed as i64;
    }
    if account.min_delay_secs >= account.max_delay_secs {
        account.min_delay_secs as i64
    } else {
        rng.gen_range(account.min_delay_secs..=account.max_delay_secs) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn account(min: u32, max: u32) -> AccountPacing {
        AccountPacing {
            id: Uuid::new_v4(),
            min_delay_secs: min,
            max_delay_secs: max,
        }
    }

    fn claimed(n: usize) -> Vec<ClaimedRecipient> {
        (0..n)
            .map(|i| ClaimedRecipient {
                id: Uuid::new_v4(),
                seq: i as i32,
            })
            .collect()
    }

    fn settings(batch_min: u32, batch_max: u32, batch_delay: u32) -> CampaignSettings {
        CampaignSettings {
            delay_between_emails: None,
            batch_size_min: batch_min,
            batch_size_max: batch_max,
            batch_delay_secs: batch_delay,
            max_retries_per_email: 3,
        }
    }

    #[test]
    fn test_fixed_delays_are_cumulative() {
        let recipients = claimed(2);
        let accounts = vec![account(15, 15)];
        let mut rng = StdRng::seed_from_u64(7);

        let plans = build_plan(&recipients, &accounts, &settings(10, 10, 120), &mut rng);

        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].send_delay_secs, 15);
        assert_eq!(plans[1].send_delay_secs, 30);
    }

    #[test]
    fn test_batch_break_inserted() {
        let recipients = claimed(5);
        let accounts = vec![account(10, 10)];
        let mut rng = StdRng::seed_from_u64(7);

        // batch size fixed at 2, break of 300s
        let plans = build_plan(&recipients, &accounts, &settings(2, 2, 300), &mut rng);

        assert_eq!(plans[0].send_delay_secs, 10);
        assert_eq!(plans[1].send_delay_secs, 20);
        // third message starts the next batch after the break
        assert_eq!(plans[2].send_delay_secs, 320);
        assert_eq!(plans[3].send_delay_secs, 330);
        // a break would fall here, but it is the last recipient
        assert_eq!(plans[4].send_delay_secs, 640);
    }

    #[test]
    fn test_no_trailing_break_before_last() {
        let recipients = claimed(3);
        let accounts = vec![account(10, 10)];
        let mut rng = StdRng::seed_from_u64(7);

        let plans = build_plan(&recipients, &accounts, &settings(2, 2, 300), &mut rng);

        // the last recipient lands on the batch boundary; the break is
        // replaced by a normal message delay
        assert_eq!(plans[2].send_delay_secs, 320);
    }

    #[test]
    fn test_random_delays_stay_in_range() {
        let recipients = claimed(20);
        let accounts = vec![account(10, 60)];
        let mut rng = StdRng::seed_from_u64(42);

        let plans = build_plan(&recipients, &accounts, &settings(100, 100, 0), &mut rng);

        let mut prev = 0i64;
        for plan in &plans {
            let gap = plan.send_delay_secs - prev;
            assert!((10..=60).contains(&gap), "gap {} out of range", gap);
            prev = plan.send_delay_secs;
        }
    }

    #[test]
    fn test_round_robin_keyed_by_seq() {
        let accounts = vec![account(10, 10), account(10, 10), account(10, 10)];
        let recipients: Vec<ClaimedRecipient> = (5..11)
            .map(|seq| ClaimedRecipient {
                id: Uuid::new_v4(),
                seq,
            })
            .collect();
        let mut rng = StdRng::seed_from_u64(7);

        let plans = build_plan(&recipients, &accounts, &settings(100, 100, 0), &mut rng);

        for (plan, recipient) in plans.iter().zip(&recipients) {
            let expected = accounts[recipient.seq as usize % 3].id;
            assert_eq!(plan.smtp_account_id, expected);
        }
    }

    #[test]
    fn test_fixed_override_wins_over_account_range() {
        let recipients = claimed(3);
        let accounts = vec![account(10, 60)];
        let mut settings = settings(100, 100, 0);
        settings.delay_between_emails = Some(5);
        let mut rng = StdRng::seed_from_u64(7);

        let plans = build_plan(&recipients, &accounts, &settings, &mut rng);

        assert_eq!(plans[0].send_delay_secs, 5);
        assert_eq!(plans[1].send_delay_secs, 10);
        assert_eq!(plans[2].send_delay_secs, 15);
    }
}
