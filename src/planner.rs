//! # Notification Planning
//!
//! Decides who is told about a disaster and through which channels, then writes the
//! notification rows and queues emails. Channel selection lives only here; the email
//! consumer trusts the job it receives.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{ChannelSet, CompanyUser, Disaster, LocationAddress, NotificationTask};
use crate::error::PipelineError;
use crate::mail::{EmailDispatchJob, MailSettings};
use crate::queue::EmailDispatchQueue;
use crate::repositories::{NotificationStore, UserDirectory};

/// Channels a user receives given their stored preferences and contact details.
pub fn resolve_channels(user: &CompanyUser) -> ChannelSet {
    let preference = user.effective_preference();
    ChannelSet {
        web: preference.web_enabled,
        email: preference.email_enabled && user.email_address().is_some(),
    }
}

/// Counts for one disaster's fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutStats {
    pub created: usize,
    pub refreshed: usize,
    pub emails_enqueued: usize,
}

pub struct NotificationPlanner {
    users: Arc<dyn UserDirectory>,
    notifications: Arc<dyn NotificationStore>,
    emails: Arc<dyn EmailDispatchQueue>,
    mail: MailSettings,
}

impl NotificationPlanner {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        notifications: Arc<dyn NotificationStore>,
        emails: Arc<dyn EmailDispatchQueue>,
        mail: MailSettings,
    ) -> Self {
        Self {
            users,
            notifications,
            emails,
            mail,
        }
    }

    /// One task per (user, matched location) for every user with at least one
    /// enabled channel. Users are looked up once per company.
    pub async fn plan(
        &self,
        disaster: &Disaster,
        matched: &[LocationAddress],
    ) -> Result<Vec<NotificationTask>, PipelineError> {
        let mut company_users: HashMap<Uuid, Vec<CompanyUser>> = HashMap::new();
        let mut tasks = Vec::new();

        for location in matched {
            if !company_users.contains_key(&location.company_id) {
                let users = self
                    .users
                    .find_users_and_preferences_by_company(location.company_id)
                    .await?;
                company_users.insert(location.company_id, users);
            }
            let users = company_users
                .get(&location.company_id)
                .map(Vec::as_slice)
                .unwrap_or_default();

            for user in users {
                let channels = resolve_channels(user);
                if channels.is_empty() {
                    counter!("notifications_planned_total", "outcome" => "suppressed").increment(1);
                    debug!(
                        user_id = %user.id,
                        disaster_id = %disaster.id,
                        "all channels disabled; skipping user"
                    );
                    continue;
                }
                tasks.push(NotificationTask {
                    user: user.clone(),
                    disaster: disaster.clone(),
                    location: location.clone(),
                    channels,
                });
            }
        }

        Ok(tasks)
    }

    /// Writes the notifications and queues an email for every notification with the
    /// email channel.
    ///
    /// Refreshed rows are re-enqueued too: the queue is idempotent per notification,
    /// so this only adds a message when an earlier attempt stored the row but never
    /// queued its email.
    pub async fn apply(
        &self,
        tasks: &[NotificationTask],
        now: DateTime<Utc>,
    ) -> Result<FanOutStats, PipelineError> {
        let mut stats = FanOutStats::default();

        for task in tasks {
            let upsert = self.notifications.upsert_notification(task, now).await?;
            let notification = upsert.notification();
            if upsert.is_created() {
                stats.created += 1;
                counter!("notifications_planned_total", "outcome" => "created").increment(1);
            } else {
                stats.refreshed += 1;
                counter!("notifications_planned_total", "outcome" => "refreshed").increment(1);
            }

            if !(task.channels.email && notification.is_email) {
                continue;
            }
            let Some(job) = EmailDispatchJob::for_task(task, notification, &self.mail) else {
                continue;
            };
            let enqueued = self.emails.enqueue(&job, now).await?;
            if enqueued.created {
                stats.emails_enqueued += 1;
                if !upsert.is_created() {
                    warn!(
                        notification_id = %notification.id,
                        message_id = %enqueued.message_id,
                        "queued missing email for existing notification"
                    );
                }
                debug!(
                    notification_id = %notification.id,
                    message_id = %enqueued.message_id,
                    "queued disaster alert email"
                );
            }
        }

        Ok(stats)
    }

    /// Plans and applies the fan-out for one disaster.
    #[instrument(skip_all, fields(disaster_id = %disaster.id, locations = matched.len()))]
    pub async fn fan_out(
        &self,
        disaster: &Disaster,
        matched: &[LocationAddress],
        now: DateTime<Utc>,
    ) -> Result<FanOutStats, PipelineError> {
        let tasks = self.plan(disaster, matched).await?;
        let stats = self.apply(&tasks, now).await?;
        info!(
            tasks = tasks.len(),
            created = stats.created,
            refreshed = stats.refreshed,
            emails = stats.emails_enqueued,
            "notification fan-out complete"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        Notification, NotificationPreference, NotificationStatus, NotificationUpsert,
    };
    use crate::error::RepositoryError;
    use crate::queue::Enqueued;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeUsers {
        by_company: HashMap<Uuid, Vec<CompanyUser>>,
        lookups: Mutex<usize>,
    }

    #[async_trait]
    impl UserDirectory for FakeUsers {
        async fn find_users_and_preferences_by_company(
            &self,
            company_id: Uuid,
        ) -> Result<Vec<CompanyUser>, RepositoryError> {
            *self.lookups.lock().unwrap() += 1;
            Ok(self.by_company.get(&company_id).cloned().unwrap_or_default())
        }
    }

    #[derive(Default)]
    struct FakeNotifications {
        rows: Mutex<HashMap<(Uuid, String), Notification>>,
    }

    #[async_trait]
    impl NotificationStore for FakeNotifications {
        async fn find_existing_notification(
            &self,
            user_id: Uuid,
            disaster_id: &str,
        ) -> Result<Option<Notification>, RepositoryError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .get(&(user_id, disaster_id.to_string()))
                .cloned())
        }

        async fn upsert_notification(
            &self,
            task: &NotificationTask,
            now: DateTime<Utc>,
        ) -> Result<NotificationUpsert, RepositoryError> {
            let mut rows = self.rows.lock().unwrap();
            let key = (task.user.id, task.disaster.id.clone());
            if let Some(existing) = rows.get_mut(&key) {
                existing.last_sent_at = now;
                existing.location_address_id = Some(task.location.id);
                existing.is_web |= task.channels.web;
                return Ok(NotificationUpsert::Refreshed(existing.clone()));
            }
            let created = Notification {
                id: Uuid::new_v4(),
                user_id: task.user.id,
                disaster_id: task.disaster.id.clone(),
                location_address_id: Some(task.location.id),
                is_web: task.channels.web,
                is_email: task.channels.email,
                status: NotificationStatus::Unread,
                first_sent_at: now,
                last_sent_at: now,
                read_at: None,
            };
            rows.insert(key, created.clone());
            Ok(NotificationUpsert::Created(created))
        }
    }

    #[derive(Default)]
    struct FakeQueue {
        jobs: Mutex<Vec<EmailDispatchJob>>,
        failures_left: Mutex<usize>,
    }

    #[async_trait]
    impl EmailDispatchQueue for FakeQueue {
        async fn enqueue(
            &self,
            job: &EmailDispatchJob,
            _now: DateTime<Utc>,
        ) -> Result<Enqueued, RepositoryError> {
            let mut failures_left = self.failures_left.lock().unwrap();
            if *failures_left > 0 {
                *failures_left -= 1;
                return Err(RepositoryError::invalid("email_job", "queue rejected write"));
            }
            let mut jobs = self.jobs.lock().unwrap();
            let created = !jobs
                .iter()
                .any(|queued| queued.notification_id == job.notification_id);
            if created {
                jobs.push(job.clone());
            }
            Ok(Enqueued {
                message_id: Uuid::new_v4(),
                created,
            })
        }
    }

    fn disaster() -> Disaster {
        Disaster {
            id: "6c2f3b0e-5d3a-4b8e-9d1c-0a3f5e7b9c11".into(),
            disaster_number: 4834,
            fips_state_code: 25,
            fips_county_code: 17,
            declaration_date: Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap(),
            incident_begin_date: None,
            incident_end_date: None,
            declaration_type: "DR".into(),
            designated_area: "Middlesex (County)".into(),
            designated_incident_types: Some("F".into()),
            last_refresh: Utc.with_ymd_and_hms(2025, 9, 2, 0, 0, 0).unwrap(),
        }
    }

    fn location(company_id: Uuid, city: &str) -> LocationAddress {
        LocationAddress {
            id: Uuid::new_v4(),
            company_id,
            alias: None,
            street_address: "1 Main St".into(),
            city: city.into(),
            state_province: "MA".into(),
            postal_code: "02139".into(),
            country: "US".into(),
            fips_state_code: 25,
            fips_county_code: 17,
        }
    }

    fn user(
        company_id: Uuid,
        email: Option<&str>,
        preference: Option<NotificationPreference>,
    ) -> CompanyUser {
        CompanyUser {
            id: Uuid::new_v4(),
            company_id,
            company_name: Some("Acme".into()),
            first_name: "Rosa".into(),
            last_name: "Diaz".into(),
            email: email.map(str::to_string),
            preference,
        }
    }

    fn prefs(email_enabled: bool, web_enabled: bool) -> Option<NotificationPreference> {
        Some(NotificationPreference {
            email_enabled,
            web_enabled,
            ..NotificationPreference::default()
        })
    }

    fn planner(
        users: FakeUsers,
    ) -> (
        NotificationPlanner,
        Arc<FakeUsers>,
        Arc<FakeNotifications>,
        Arc<FakeQueue>,
    ) {
        let users = Arc::new(users);
        let notifications = Arc::new(FakeNotifications::default());
        let queue = Arc::new(FakeQueue::default());
        let planner = NotificationPlanner::new(
            users.clone(),
            notifications.clone(),
            queue.clone(),
            MailSettings {
                from_address: "alerts@prisere.test".into(),
                subject: "FEMA Disaster Alert from Prisere".into(),
            },
        );
        (planner, users, notifications, queue)
    }

    #[test]
    fn email_needs_preference_and_address() {
        let company = Uuid::new_v4();
        assert_eq!(
            resolve_channels(&user(company, Some("a@b.test"), None)),
            ChannelSet {
                web: true,
                email: true
            }
        );
        assert_eq!(
            resolve_channels(&user(company, None, prefs(true, false))),
            ChannelSet::default()
        );
        assert_eq!(
            resolve_channels(&user(company, Some("a@b.test"), prefs(false, true))),
            ChannelSet {
                web: true,
                email: false
            }
        );
    }

    #[tokio::test]
    async fn two_locations_one_notification_one_email() {
        let company = Uuid::new_v4();
        let rosa = user(company, Some("rosa@acme.test"), None);
        let users = FakeUsers {
            by_company: HashMap::from([(company, vec![rosa.clone()])]),
            ..FakeUsers::default()
        };
        let (planner, users, notifications, queue) = planner(users);
        let first_location = location(company, "Cambridge");
        let second_location = location(company, "Somerville");
        let matched = vec![first_location.clone(), second_location.clone()];

        let first_at = Utc.with_ymd_and_hms(2025, 9, 3, 0, 0, 0).unwrap();
        let stats = planner
            .fan_out(&disaster(), &matched[..1], first_at)
            .await
            .unwrap();
        assert_eq!(stats.created, 1);

        let second_at = first_at + Duration::minutes(5);
        let stats = planner
            .fan_out(&disaster(), &matched[1..], second_at)
            .await
            .unwrap();
        assert_eq!(
            stats,
            FanOutStats {
                created: 0,
                refreshed: 1,
                emails_enqueued: 0
            }
        );

        let row = notifications
            .find_existing_notification(rosa.id, &disaster().id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.first_sent_at, first_at);
        assert_eq!(row.last_sent_at, second_at);
        assert_eq!(row.location_address_id, Some(second_location.id));
        assert_eq!(notifications.rows.lock().unwrap().len(), 1);
        assert_eq!(queue.jobs.lock().unwrap().len(), 1);
        assert_eq!(*users.lookups.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn same_company_locations_resolve_users_once() {
        let company = Uuid::new_v4();
        let users = FakeUsers {
            by_company: HashMap::from([(
                company,
                vec![user(company, Some("rosa@acme.test"), None)],
            )]),
            ..FakeUsers::default()
        };
        let (planner, users, _, queue) = planner(users);
        let matched = vec![location(company, "Cambridge"), location(company, "Somerville")];

        let tasks = planner.plan(&disaster(), &matched).await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(*users.lookups.lock().unwrap(), 1);

        let stats = planner.apply(&tasks, Utc::now()).await.unwrap();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.refreshed, 1);
        assert_eq!(queue.jobs.lock().unwrap()[0].city.as_deref(), Some("Cambridge"));
    }

    #[tokio::test]
    async fn disabled_channels_produce_nothing() {
        let company = Uuid::new_v4();
        let muted = user(company, Some("muted@acme.test"), prefs(false, false));
        let users = FakeUsers {
            by_company: HashMap::from([(company, vec![muted.clone()])]),
            ..FakeUsers::default()
        };
        let (planner, _, notifications, queue) = planner(users);

        let stats = planner
            .fan_out(&disaster(), &[location(company, "Cambridge")], Utc::now())
            .await
            .unwrap();

        assert_eq!(stats, FanOutStats::default());
        assert!(notifications.rows.lock().unwrap().is_empty());
        assert!(queue.jobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn web_only_users_get_a_row_but_no_email() {
        let company = Uuid::new_v4();
        let web_only = user(company, Some("web@acme.test"), prefs(false, true));
        let no_address = user(company, None, None);
        let users = FakeUsers {
            by_company: HashMap::from([(company, vec![web_only.clone(), no_address.clone()])]),
            ..FakeUsers::default()
        };
        let (planner, _, notifications, queue) = planner(users);

        let stats = planner
            .fan_out(&disaster(), &[location(company, "Cambridge")], Utc::now())
            .await
            .unwrap();

        assert_eq!(stats.created, 2);
        assert_eq!(stats.emails_enqueued, 0);
        assert!(queue.jobs.lock().unwrap().is_empty());
        let rows = notifications.rows.lock().unwrap();
        assert!(rows.values().all(|row| row.is_web && !row.is_email));
    }

    #[tokio::test]
    async fn failed_enqueue_is_repaired_on_refresh() {
        let company = Uuid::new_v4();
        let rosa = user(company, Some("rosa@acme.test"), None);
        let users = FakeUsers {
            by_company: HashMap::from([(company, vec![rosa.clone()])]),
            ..FakeUsers::default()
        };
        let (planner, _, notifications, queue) = planner(users);
        *queue.failures_left.lock().unwrap() = 1;
        let matched = [location(company, "Cambridge")];

        assert!(planner.fan_out(&disaster(), &matched, Utc::now()).await.is_err());
        assert_eq!(notifications.rows.lock().unwrap().len(), 1);
        assert!(queue.jobs.lock().unwrap().is_empty());

        let stats = planner.fan_out(&disaster(), &matched, Utc::now()).await.unwrap();
        assert_eq!(
            stats,
            FanOutStats {
                created: 0,
                refreshed: 1,
                emails_enqueued: 1
            }
        );
        let jobs = queue.jobs.lock().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].to, "rosa@acme.test");
    }
}
