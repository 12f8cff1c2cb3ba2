//! Intelligent task scheduling: the dispatch-decision oracle and the
//! in-memory priority queue of held-back tasks.

use tracing::{debug, info, warn};

use soms_world::WorldModel;

/// Queued tasks older than this are force-dispatched.
const MAX_QUEUE_AGE_SECS: f64 = 24.0 * 3600.0;

/// A task the oracle decided to hold back, waiting for better conditions.
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub task_id: i64,
    pub title: String,
    pub urgency: i64,
    pub zone: Option<String>,
    pub min_people_required: i64,
    pub estimated_duration: i64,
    pub created_at: f64,
    pub deadline: Option<f64>,
}

impl QueuedTask {
    /// Priority score for queue ordering; higher is served first.
    ///
    /// urgency × 1000, plus one point per hour waited, plus a deadline
    /// proximity bonus (100 inside 2 h, 50 inside 6 h).
    pub fn priority(&self, now: f64) -> f64 {
        let mut priority = (self.urgency * 1000) as f64;
        priority += (now - self.created_at) / 3600.0;
        if let Some(deadline) = self.deadline {
            let hours_left = (deadline - now) / 3600.0;
            if hours_left < 2.0 {
                priority += 100.0;
            } else if hours_left < 6.0 {
                priority += 50.0;
            }
        }
        priority
    }

    pub fn is_stale(&self, now: f64) -> bool {
        now - self.created_at > MAX_QUEUE_AGE_SECS
    }
}

/// Inputs to the dispatch oracle.
#[derive(Debug, Clone)]
pub struct DispatchQuery<'a> {
    pub urgency: i64,
    pub zone: Option<&'a str>,
    pub min_people_required: i64,
    pub interruptible: bool,
}

/// First matching rule wins; the reason string is logged and surfaced.
pub fn should_dispatch_now(
    world: &WorldModel,
    query: &DispatchQuery<'_>,
    local_hour: u32,
    active_hours: (u32, u32),
) -> (bool, String) {
    if query.urgency >= 4 {
        return (true, "Critical urgency".to_string());
    }
    let Some(zone_id) = query.zone else {
        return (true, "No zone constraint".to_string());
    };
    let Some(zone) = world.get_zone(zone_id) else {
        return (false, format!("Zone '{zone_id}' not active yet"));
    };

    let people = zone.occupancy.person_count as i64;
    if people < query.min_people_required {
        return (
            false,
            format!(
                "Not enough people in {zone_id} ({people}/{})",
                query.min_people_required
            ),
        );
    }

    if !query.interruptible && query.urgency < 3 {
        let dominant = zone.occupancy.dominant_activity();
        if dominant.to_lowercase().contains("focused") {
            return (
                false,
                format!("Users in {zone_id} are focused (non-interruptible task)"),
            );
        }
    }

    if query.urgency >= 3 {
        return (true, format!("High urgency ({})", query.urgency));
    }

    let (start, end) = active_hours;
    if (local_hour < start || local_hour > end) && query.urgency < 3 {
        return (
            false,
            format!("Outside preferred hours ({start}:00-{end}:00)"),
        );
    }

    if people > 0 {
        return (true, format!("Zone {zone_id} occupied ({people} people)"));
    }
    (false, format!("Zone {zone_id} is empty"))
}

/// Priority queue plus the re-evaluation pass run at the top of every
/// cognitive cycle.
#[derive(Debug, Default)]
pub struct TaskScheduler {
    queue: Vec<QueuedTask>,
}

impl TaskScheduler {
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Hold a task back. The caller has already created it queued in the
    /// task store.
    pub fn enqueue(&mut self, task: QueuedTask) {
        info!(task = task.task_id, title = %task.title, "task queued");
        self.queue.push(task);
    }

    /// Re-evaluate every queued task through the oracle. Returns the tasks
    /// to dispatch now (in priority order); the rest stay queued.
    pub fn process_queue(
        &mut self,
        world: &WorldModel,
        local_hour: u32,
        active_hours: (u32, u32),
        now: f64,
    ) -> Vec<QueuedTask> {
        if self.queue.is_empty() {
            return Vec::new();
        }
        debug!(waiting = self.queue.len(), "processing task queue");

        let mut pending = std::mem::take(&mut self.queue);
        pending.sort_by(|a, b| b.priority(now).total_cmp(&a.priority(now)));

        let mut dispatch = Vec::new();
        for task in pending {
            let query = DispatchQuery {
                urgency: task.urgency,
                zone: task.zone.as_deref(),
                min_people_required: task.min_people_required,
                interruptible: true,
            };
            let (should_dispatch, reason) =
                should_dispatch_now(world, &query, local_hour, active_hours);
            if should_dispatch {
                info!(task = task.task_id, reason = %reason, "dispatching queued task");
                dispatch.push(task);
            } else if task.is_stale(now) {
                warn!(task = task.task_id, "force dispatching stale task (queued over 24h)");
                dispatch.push(task);
            } else {
                self.queue.push(task);
            }
        }
        dispatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ACTIVE_HOURS: (u32, u32) = (7, 22);

    fn world_with_people(zone: &str, count: u32) -> WorldModel {
        let mut world = WorldModel::new();
        world.update_at(
            &format!("office/{zone}/camera/cam_01"),
            &json!({"person_count": count}),
            0.0,
        );
        world
    }

    fn query(urgency: i64, zone: Option<&str>, min_people: i64) -> DispatchQuery<'_> {
        DispatchQuery {
            urgency,
            zone,
            min_people_required: min_people,
            interruptible: true,
        }
    }

    fn queued(task_id: i64, urgency: i64, zone: &str, min_people: i64, created_at: f64) -> QueuedTask {
        QueuedTask {
            task_id,
            title: format!("task {task_id}"),
            urgency,
            zone: Some(zone.to_string()),
            min_people_required: min_people,
            estimated_duration: 10,
            created_at,
            deadline: None,
        }
    }

    #[test]
    fn critical_urgency_always_dispatches() {
        let world = WorldModel::new();
        let (dispatch, reason) =
            should_dispatch_now(&world, &query(4, Some("nowhere"), 99), 3, ACTIVE_HOURS);
        assert!(dispatch);
        assert_eq!(reason, "Critical urgency");
    }

    #[test]
    fn zoneless_tasks_dispatch_immediately() {
        let world = WorldModel::new();
        let (dispatch, _) = should_dispatch_now(&world, &query(1, None, 1), 12, ACTIVE_HOURS);
        assert!(dispatch);
    }

    #[test]
    fn unknown_zone_queues() {
        let world = WorldModel::new();
        let (dispatch, reason) =
            should_dispatch_now(&world, &query(2, Some("main"), 1), 12, ACTIVE_HOURS);
        assert!(!dispatch);
        assert!(reason.contains("not active"));
    }

    #[test]
    fn min_people_requirement_queues() {
        let world = world_with_people("main", 1);
        let (dispatch, _) = should_dispatch_now(&world, &query(2, Some("main"), 2), 12, ACTIVE_HOURS);
        assert!(!dispatch);
        let world = world_with_people("main", 2);
        let (dispatch, _) = should_dispatch_now(&world, &query(2, Some("main"), 2), 12, ACTIVE_HOURS);
        assert!(dispatch);
    }

    #[test]
    fn focused_zone_blocks_non_interruptible_low_urgency() {
        let mut world = world_with_people("main", 2);
        world.update_at(
            "office/main/camera/cam_01",
            &json!({"person_count": 2, "activity_distribution": {"focused": 2}}),
            1.0,
        );
        let blocked = DispatchQuery {
            urgency: 2,
            zone: Some("main"),
            min_people_required: 1,
            interruptible: false,
        };
        let (dispatch, reason) = should_dispatch_now(&world, &blocked, 12, ACTIVE_HOURS);
        assert!(!dispatch);
        assert!(reason.contains("focused"));

        // Interruptible or high-urgency versions go through.
        let (dispatch, _) = should_dispatch_now(&world, &query(2, Some("main"), 1), 12, ACTIVE_HOURS);
        assert!(dispatch);
        let urgent = DispatchQuery { urgency: 3, ..blocked };
        let (dispatch, _) = should_dispatch_now(&world, &urgent, 12, ACTIVE_HOURS);
        assert!(dispatch);
    }

    #[test]
    fn night_hours_queue_low_urgency() {
        let world = world_with_people("main", 2);
        let (dispatch, reason) = should_dispatch_now(&world, &query(2, Some("main"), 1), 23, ACTIVE_HOURS);
        assert!(!dispatch);
        assert!(reason.contains("hours"));
        let (dispatch, _) = should_dispatch_now(&world, &query(3, Some("main"), 1), 23, ACTIVE_HOURS);
        assert!(dispatch);
    }

    #[test]
    fn empty_zone_queues() {
        let mut world = world_with_people("main", 1);
        world.update_at("office/main/camera/cam_01", &json!({"person_count": 0}), 1.0);
        let (dispatch, reason) = should_dispatch_now(&world, &query(2, Some("main"), 0), 12, ACTIVE_HOURS);
        assert!(!dispatch);
        assert!(reason.contains("empty"));
    }

    #[test]
    fn priority_orders_by_urgency_then_age_and_deadline() {
        let now = 100_000.0;
        let old_low = queued(1, 1, "a", 1, now - 7200.0);
        let fresh_high = queued(2, 3, "a", 1, now);
        assert!(fresh_high.priority(now) > old_low.priority(now));

        let mut with_deadline = queued(3, 1, "a", 1, now);
        with_deadline.deadline = Some(now + 3600.0);
        assert!(with_deadline.priority(now) > old_low.priority(now) + 90.0);
    }

    #[test]
    fn queue_dispatches_when_conditions_change() {
        let mut scheduler = TaskScheduler::default();
        let world = world_with_people("main", 1);
        scheduler.enqueue(queued(1, 2, "main", 2, 0.0));

        // One person present, two required: stays queued.
        let dispatched = scheduler.process_queue(&world, 12, ACTIVE_HOURS, 10.0);
        assert!(dispatched.is_empty());
        assert_eq!(scheduler.len(), 1);

        // Second person arrives: next cycle dispatches it.
        let world = world_with_people("main", 2);
        let dispatched = scheduler.process_queue(&world, 12, ACTIVE_HOURS, 20.0);
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].task_id, 1);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn stale_tasks_are_force_dispatched() {
        let mut scheduler = TaskScheduler::default();
        let world = WorldModel::new();
        // Zone unknown forever, but the task has waited over 24 hours.
        scheduler.enqueue(queued(1, 2, "ghost_zone", 1, 0.0));
        let dispatched = scheduler.process_queue(&world, 12, ACTIVE_HOURS, 25.0 * 3600.0);
        assert_eq!(dispatched.len(), 1);
    }

    #[test]
    fn higher_priority_tasks_dispatch_first() {
        let mut scheduler = TaskScheduler::default();
        let world = world_with_people("main", 3);
        scheduler.enqueue(queued(1, 1, "main", 1, 0.0));
        scheduler.enqueue(queued(2, 3, "main", 1, 0.0));
        let dispatched = scheduler.process_queue(&world, 12, ACTIVE_HOURS, 10.0);
        assert_eq!(dispatched[0].task_id, 2);
        assert_eq!(dispatched[1].task_id, 1);
    }
}
