//! Room (topic) naming and per-connection membership bookkeeping.
//!
//! Room names are derived from entity ids so client and server agree without
//! a discovery step: `Room::Project("p1")` is joined by emitting
//! `join_project` with the payload `"project_p1"`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A logical broadcast scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Room {
    User(String),
    Org(String),
    Project(String),
}

impl Room {
    /// Scope prefix shared by the room name and its join/leave events.
    pub fn scope(&self) -> &'static str {
        match self {
            Room::User(_) => "user",
            Room::Org(_) => "org",
            Room::Project(_) => "project",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Room::User(id) | Room::Org(id) | Room::Project(id) => id,
        }
    }

    /// Wire name of the room, e.g. `project_p1`.
    pub fn name(&self) -> String {
        format!("{}_{}", self.scope(), self.id())
    }

    /// Event emitted to join, e.g. `join_project`.
    pub fn join_event(&self) -> String {
        format!("join_{}", self.scope())
    }

    /// Event emitted to leave, e.g. `leave_project`.
    pub fn leave_event(&self) -> String {
        format!("leave_{}", self.scope())
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Room {
    type Err = String;

    /// Accepts `project:p1`, `project_p1` and the same for `user` / `org`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scope, id) = s
            .split_once(':')
            .or_else(|| s.split_once('_'))
            .ok_or_else(|| format!("Invalid room '{}': expected <scope>:<id>", s))?;
        if id.is_empty() {
            return Err(format!("Invalid room '{}': empty id", s));
        }
        match scope {
            "user" => Ok(Room::User(id.to_string())),
            "org" => Ok(Room::Org(id.to_string())),
            "project" => Ok(Room::Project(id.to_string())),
            other => Err(format!(
                "Invalid room scope '{}'. Valid scopes: user, org, project",
                other
            )),
        }
    }
}

/// Reference-counted room membership for one connection.
///
/// Several views may hold the same room; the server only sees one join when
/// the first holder arrives and one leave when the last holder goes.
#[derive(Debug, Default)]
pub struct RoomTable {
    holders: BTreeMap<Room, usize>,
}

impl RoomTable {
    /// Record a holder. Returns `true` when this is the first one, meaning
    /// a join must be emitted.
    pub fn acquire(&mut self, room: &Room) -> bool {
        let count = self.holders.entry(room.clone()).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Drop a holder. Returns `true` when this was the last one, meaning a
    /// leave must be emitted. Releasing a room that is not held is a no-op.
    pub fn release(&mut self, room: &Room) -> bool {
        match self.holders.get_mut(room) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.holders.remove(room);
                true
            }
            None => false,
        }
    }

    /// Rooms currently held, in stable order.
    pub fn held(&self) -> Vec<Room> {
        self.holders.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_names_are_deterministic() {
        let room = Room::Project("64f1c2".to_string());
        assert_eq!(room.name(), "project_64f1c2");
        assert_eq!(room.join_event(), "join_project");
        assert_eq!(room.leave_event(), "leave_project");
        assert_eq!(Room::Org("org_2x".to_string()).name(), "org_org_2x");
        assert_eq!(Room::User("user_9".to_string()).join_event(), "join_user");
    }

    #[test]
    fn test_room_from_str() {
        assert_eq!(
            "project:p1".parse::<Room>().unwrap(),
            Room::Project("p1".to_string())
        );
        assert_eq!("org_o1".parse::<Room>().unwrap(), Room::Org("o1".to_string()));
        // Clerk ids contain underscores; the colon form keeps them intact.
        assert_eq!(
            "user:user_2abc".parse::<Room>().unwrap(),
            Room::User("user_2abc".to_string())
        );
    }

    #[test]
    fn test_room_from_str_invalid() {
        assert!("team:t1".parse::<Room>().is_err());
        assert!("project:".parse::<Room>().is_err());
        assert!("nothing".parse::<Room>().is_err());
    }

    #[test]
    fn test_room_table_first_acquire_and_last_release() {
        let mut table = RoomTable::default();
        let room = Room::Project("p1".to_string());

        assert!(table.acquire(&room));
        assert!(!table.acquire(&room));
        assert_eq!(table.held(), vec![room.clone()]);

        assert!(!table.release(&room));
        assert!(table.release(&room));
        assert!(table.is_empty());
    }

    #[test]
    fn test_room_table_release_unknown_is_noop() {
        let mut table = RoomTable::default();
        assert!(!table.release(&Room::Org("o1".to_string())));
        assert!(table.is_empty());
    }

    #[test]
    fn test_room_table_held_is_sorted() {
        let mut table = RoomTable::default();
        table.acquire(&Room::Project("b".to_string()));
        table.acquire(&Room::User("u".to_string()));
        table.acquire(&Room::Project("a".to_string()));
        assert_eq!(
            table.held(),
            vec![
                Room::User("u".to_string()),
                Room::Project("a".to_string()),
                Room::Project("b".to_string()),
            ]
        );
    }
}
