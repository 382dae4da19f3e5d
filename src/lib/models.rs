/// A row of the `flags` table
#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Eq)]
pub struct FlagModel {
    pub value: String,
    pub sploit: String,
    pub team: String,
    pub discovered_at: i64,
    pub status: String,
    pub checksystem_response: Option<String>,
    pub sent_cycle: i64,
}

/// Written back for one flag at the end of a cycle
#[derive(Debug, Clone)]
pub struct ResultUpdate {
    pub value: String,
    pub status: String,
    pub checksystem_response: String,
    /// `false` leaves `sent_cycle` as it was, used when the protocol never
    /// got to look at the flag
    pub stamp: bool,
}

/// `SELECT status, sploit, team, COUNT(*)` row
#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Eq)]
pub struct StatusCount {
    pub status: String,
    pub sploit: String,
    pub team: String,
    pub count: i64,
}

/// Owner of a flag that just expired
#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub sploit: String,
    pub team: String,
}
