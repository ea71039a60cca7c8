use clap::{Parser, Subcommand};
use std::sync::Arc;
use uuid::Uuid;

use medcircle_audit::MemoryAuditLog;
use medcircle_core::{
    EntitlementClock, JoinOutcome, JoinPolicy, RosterService, SystemClock,
};
use medcircle_events_memory::MemoryEventBus;
use medcircle_storage::{Group, GroupId, JoinRequestId, UserId};
use medcircle_store_sqlite::SqliteStore;

// ────────────────────────────────────── CLI Types ──────────────────────────────────────

#[derive(Parser)]
#[command(name = "medcircle")]
#[command(about = "Medcircle group & entitlement CLI")]
struct Cli {
    /// Acting user ID (UUID). Identity verification happens upstream; this
    /// tool trusts the caller.
    #[arg(long, env = "MEDCIRCLE_ACTOR")]
    actor: Uuid,

    /// Require admin approval for joins instead of admitting directly
    #[arg(long, env = "MEDCIRCLE_REQUIRE_APPROVAL")]
    require_approval: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Group commands
    Group {
        #[command(subcommand)]
        group_cmd: GroupCommand,
    },
    /// Join a group by invite code
    Join {
        /// Invite code
        code: String,

        /// Display name shown to other members
        #[arg(long, default_value = "Member")]
        name: String,
    },
    /// Join request commands (approval mode)
    Request {
        #[command(subcommand)]
        request_cmd: RequestCommand,
    },
    /// Member commands
    Member {
        #[command(subcommand)]
        member_cmd: MemberCommand,
    },
    /// Leave a group (starts the creation cooldown)
    Leave {
        /// Group ID
        group_id: Uuid,
    },
    /// Leave-then-create path: start your own group as a former member
    Transition {
        /// Group name
        name: String,

        /// Display name shown to other members
        #[arg(long, default_value = "Admin")]
        display_name: String,
    },
}

#[derive(Subcommand)]
enum GroupCommand {
    /// List groups you belong to
    List,
    /// Create a new group (you become owner and sole admin)
    Create {
        /// Group name
        name: String,

        /// Display name shown to other members
        #[arg(long, default_value = "Admin")]
        display_name: String,
    },
    /// Show group details
    Show {
        /// Group ID
        group_id: Uuid,
    },
    /// Rename a group
    Rename {
        /// Group ID
        group_id: Uuid,
        /// New name
        name: String,
    },
    /// Set the subscription override
    Subscription {
        /// Group ID
        group_id: Uuid,
        /// "on" or "off"
        state: String,
    },
    /// Delete a group (owner only)
    Delete {
        /// Group ID
        group_id: Uuid,
    },
}

#[derive(Subcommand)]
enum RequestCommand {
    /// List pending requests for a group (admin only)
    List {
        /// Group ID
        group_id: Uuid,
    },
    /// Approve a pending request
    Approve {
        /// Request ID
        request_id: Uuid,
    },
    /// Deny a pending request
    Deny {
        /// Request ID
        request_id: Uuid,
    },
    /// Cancel your own pending request
    Cancel {
        /// Request ID
        request_id: Uuid,
    },
}

#[derive(Subcommand)]
enum MemberCommand {
    /// List a group's roster
    List {
        /// Group ID
        group_id: Uuid,
    },
    /// Remove a member (owner only; starts their cooldown)
    Remove {
        /// Group ID
        group_id: Uuid,
        /// Member's user ID
        user_id: Uuid,
    },
    /// Promote a member to admin (owner only, 30 days of tenure required)
    Promote {
        /// Group ID
        group_id: Uuid,
        /// Member's user ID
        user_id: Uuid,
    },
    /// Enable or disable a member's access without removing them
    Access {
        /// Group ID
        group_id: Uuid,
        /// Member's user ID
        user_id: Uuid,
        /// "on" or "off"
        state: String,
    },
}

// ────────────────────────────────────── Helpers ──────────────────────────────────────

async fn service(require_approval: bool) -> Result<RosterService, Box<dyn std::error::Error>> {
    let store = Arc::new(SqliteStore::open_default().await?);
    let clock = Arc::new(SystemClock);
    let entitlements = Arc::new(EntitlementClock::new(store.clone(), clock.clone()));
    let policy = if require_approval {
        JoinPolicy::RequireApproval
    } else {
        JoinPolicy::Direct
    };
    Ok(RosterService::new(
        store,
        clock,
        entitlements,
        Arc::new(MemoryAuditLog::new()),
        Arc::new(MemoryEventBus::new()),
        policy,
    ))
}

fn parse_switch(state: &str) -> Result<bool, Box<dyn std::error::Error>> {
    match state {
        "on" => Ok(true),
        "off" => Ok(false),
        other => Err(format!("expected 'on' or 'off', got '{}'", other).into()),
    }
}

fn print_group(group: &Group) {
    println!("Group: {}", group.name);
    println!("  ID:          {}", group.id.0);
    println!("  Invite code: {}", group.invite_code);
    println!("  Owner:       {}", group.created_by.0);
    println!(
        "  Members:     {}/{}",
        group.member_ids.len(),
        medcircle_storage::MAX_MEMBERS
    );
    if group.has_active_subscription {
        println!("  Plan:        subscribed");
    } else {
        println!("  Trial ends:  {}", group.trial_end_date.to_rfc3339());
    }
}

// ────────────────────────────────────── Commands ──────────────────────────────────────

async fn cmd_group_list(
    svc: &RosterService,
    actor: &UserId,
) -> Result<(), Box<dyn std::error::Error>> {
    let groups = svc.groups_for(actor).await?;
    if groups.is_empty() {
        println!("No groups found.");
    } else {
        println!("Groups:\n");
        for group in groups {
            println!("  {} ({})", group.name, group.id.0);
        }
    }
    Ok(())
}

async fn cmd_group_create(
    svc: &RosterService,
    actor: &UserId,
    name: &str,
    display_name: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let group = svc.create_group(actor, name, display_name).await?;
    println!("✓ Group created!\n");
    print_group(&group);
    Ok(())
}

async fn cmd_join(
    svc: &RosterService,
    actor: &UserId,
    code: &str,
    name: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    match svc.request_join(actor, code, name).await? {
        JoinOutcome::Joined(group) => {
            println!("✓ Joined '{}'", group.name);
        }
        JoinOutcome::Pending(request) => {
            println!("✓ Request submitted, waiting for an admin to approve");
            println!("Request ID: {}", request.id.0);
        }
    }
    Ok(())
}

async fn cmd_request_list(
    svc: &RosterService,
    actor: &UserId,
    group_id: &GroupId,
) -> Result<(), Box<dyn std::error::Error>> {
    let requests = svc.pending_requests(actor, group_id).await?;
    if requests.is_empty() {
        println!("No pending requests.");
    } else {
        println!("Pending requests:\n");
        for request in requests {
            println!(
                "  {} - {} ({})",
                request.id.0, request.user_name, request.user_id.0
            );
        }
    }
    Ok(())
}

async fn cmd_member_list(
    svc: &RosterService,
    group_id: &GroupId,
) -> Result<(), Box<dyn std::error::Error>> {
    let group = svc.get_group(group_id).await?;
    let members = svc.members(group_id).await?;
    println!("Members of '{}':\n", group.name);
    for member in members {
        let access = if member.is_access_enabled { "" } else { " [disabled]" };
        println!(
            "  {} - {} ({}/{}){}",
            member.user_id.0,
            member.display_name,
            member.role.as_str(),
            member.permission.as_str(),
            access
        );
    }
    Ok(())
}

// ────────────────────────────────────── Main ──────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let actor = UserId(cli.actor);
    let svc = service(cli.require_approval).await?;

    match cli.command {
        Command::Group { group_cmd } => match group_cmd {
            GroupCommand::List => {
                cmd_group_list(&svc, &actor).await?;
            }
            GroupCommand::Create { name, display_name } => {
                cmd_group_create(&svc, &actor, &name, &display_name).await?;
            }
            GroupCommand::Show { group_id } => {
                let group = svc.get_group(&GroupId(group_id)).await?;
                print_group(&group);
            }
            GroupCommand::Rename { group_id, name } => {
                svc.rename_group(&actor, &GroupId(group_id), &name).await?;
                println!("✓ Group renamed to '{}'", name);
            }
            GroupCommand::Subscription { group_id, state } => {
                let active = parse_switch(&state)?;
                svc.set_subscription(&actor, &GroupId(group_id), active).await?;
                println!("✓ Subscription {}", state);
            }
            GroupCommand::Delete { group_id } => {
                svc.delete_group(&actor, &GroupId(group_id)).await?;
                println!("✓ Group deleted");
            }
        },
        Command::Join { code, name } => {
            cmd_join(&svc, &actor, &code, &name).await?;
        }
        Command::Request { request_cmd } => match request_cmd {
            RequestCommand::List { group_id } => {
                cmd_request_list(&svc, &actor, &GroupId(group_id)).await?;
            }
            RequestCommand::Approve { request_id } => {
                let group = svc.approve(&actor, &JoinRequestId(request_id)).await?;
                println!("✓ Request approved; '{}' now has {} members", group.name, group.member_ids.len());
            }
            RequestCommand::Deny { request_id } => {
                svc.deny(&actor, &JoinRequestId(request_id)).await?;
                println!("✓ Request denied");
            }
            RequestCommand::Cancel { request_id } => {
                svc.cancel(&actor, &JoinRequestId(request_id)).await?;
                println!("✓ Request cancelled");
            }
        },
        Command::Member { member_cmd } => match member_cmd {
            MemberCommand::List { group_id } => {
                cmd_member_list(&svc, &GroupId(group_id)).await?;
            }
            MemberCommand::Remove { group_id, user_id } => {
                svc.remove_member(&actor, &GroupId(group_id), &UserId(user_id)).await?;
                println!("✓ Member removed");
            }
            MemberCommand::Promote { group_id, user_id } => {
                svc.promote_to_admin(&actor, &GroupId(group_id), &UserId(user_id)).await?;
                println!("✓ Member promoted to admin");
            }
            MemberCommand::Access { group_id, user_id, state } => {
                let enabled = parse_switch(&state)?;
                svc.toggle_access(&actor, &GroupId(group_id), &UserId(user_id), enabled).await?;
                println!("✓ Access {}", state);
            }
        },
        Command::Leave { group_id } => {
            svc.leave(&actor, &GroupId(group_id)).await?;
            println!("✓ Left the group (group creation is on cooldown for 30 days)");
        }
        Command::Transition { name, display_name } => {
            let group = svc.start_own_group_after_leaving(&actor, &name, &display_name).await?;
            println!("✓ Group created!\n");
            print_group(&group);
        }
    }

    Ok(())
}
