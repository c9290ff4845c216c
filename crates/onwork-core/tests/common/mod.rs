#![allow(dead_code)]

use onwork_core::config::ProjectConfig;
use onwork_core::coordinator::Confirmation;
use onwork_core::db;
use onwork_core::model::{
    Amount, CommitmentHash, JobDraft, Milestone, MilestoneSpec, Role, User, WalletAddress,
};
use onwork_core::{Caller, Coordinator, SimulatedEscrow};
use rusqlite::Connection;

pub const CLIENT: u8 = 1;
pub const FREELANCER: u8 = 2;
pub const ARBITER: u8 = 3;
pub const OUTSIDER: u8 = 4;

pub fn wallet(n: u8) -> WalletAddress {
    format!("0x{n:040x}").parse().unwrap()
}

pub fn hash(text: &str) -> CommitmentHash {
    CommitmentHash::digest(text)
}

pub fn draft(amounts: &[u128], total: u128) -> JobDraft {
    let title = "Landing page";
    let description = "Design and build a landing page";
    JobDraft {
        title: title.into(),
        description: description.into(),
        category: Some("web".into()),
        job_hash: JobDraft::commit(title, description),
        client_wallet: wallet(CLIENT),
        arbiter: wallet(ARBITER),
        token_address: None,
        total_amount: Amount::new(total),
        milestones: amounts
            .iter()
            .enumerate()
            .map(|(i, amount)| MilestoneSpec {
                amount: Amount::new(*amount),
                description_hash: hash(&format!("milestone {i}")),
            })
            .collect(),
    }
}

/// A store, a simulated contract that mines on demand, and default config.
pub struct World {
    pub conn: Connection,
    pub chain: SimulatedEscrow,
    pub config: ProjectConfig,
}

impl World {
    pub fn new() -> Self {
        Self::with_config(ProjectConfig::default())
    }

    pub fn with_config(config: ProjectConfig) -> Self {
        Self {
            conn: db::open_in_memory().unwrap(),
            chain: SimulatedEscrow::new(false),
            config,
        }
    }

    pub fn coordinator(&self) -> Coordinator<'_, &SimulatedEscrow> {
        Coordinator::new(&self.conn, &self.chain, &self.config)
    }

    pub fn register(&self, name: &str, wallet_no: Option<u8>, role: Role) -> Caller {
        let user = self
            .coordinator()
            .register(name, &format!("{name}@example.com"), wallet_no.map(wallet), role)
            .unwrap()
            .value;
        Caller::user(user.id)
    }

    pub fn user(&self, caller: &Caller) -> User {
        self.coordinator().current_user(caller).unwrap()
    }

    /// Mine everything queued and confirm `tx_ref`.
    pub fn mine_and_confirm(&self, caller: &Caller, tx_ref: &str) -> Confirmation {
        self.chain.mine().unwrap();
        self.coordinator()
            .confirm_transaction(caller, tx_ref)
            .unwrap()
            .value
    }

    pub fn milestones(&self, job_id: &str) -> Vec<Milestone> {
        self.coordinator().milestones_by_job(job_id).unwrap().milestones
    }
}

fn applied_job(confirmation: Confirmation) -> String {
    match confirmation {
        Confirmation::Applied { job_id, .. } => job_id,
        other => panic!("expected applied confirmation, got {other:?}"),
    }
}

/// Parties of one job driven through the contract.
pub struct Fixture {
    pub world: World,
    pub client: Caller,
    pub freelancer: Caller,
    pub arbiter: Caller,
    pub job_id: String,
}

impl Fixture {
    /// Job created on-chain and in the store, nobody assigned yet.
    pub fn created(amounts: &[u128]) -> Self {
        Self::created_in(World::new(), amounts)
    }

    pub fn created_in(world: World, amounts: &[u128]) -> Self {
        let client = world.register("client", Some(CLIENT), Role::Client);
        let freelancer = world.register("freelancer", Some(FREELANCER), Role::Freelancer);
        let arbiter = world.register("arbiter", Some(ARBITER), Role::Client);

        let total = amounts.iter().sum();
        let pending = world
            .coordinator()
            .send_create_job(&client, draft(amounts, total))
            .unwrap()
            .value;
        let job_id = applied_job(world.mine_and_confirm(&client, &pending.tx_ref));
        Self {
            world,
            client,
            freelancer,
            arbiter,
            job_id,
        }
    }

    /// Freelancer applied, accepted, and assigned on-chain.
    pub fn assigned(amounts: &[u128]) -> Self {
        Self::assigned_in(World::new(), amounts)
    }

    pub fn assigned_in(world: World, amounts: &[u128]) -> Self {
        let fx = Self::created_in(world, amounts);
        let coordinator = fx.world.coordinator();
        let application = coordinator
            .create_job_application(&fx.freelancer, &fx.job_id, "I can do this", &wallet(FREELANCER))
            .unwrap()
            .value;
        coordinator.accept_application(&fx.client, &application.id).unwrap();
        let pending = coordinator
            .send_assign_freelancer(&fx.client, &fx.job_id, &application.id)
            .unwrap()
            .value;
        fx.world.mine_and_confirm(&fx.client, &pending.tx_ref);
        fx
    }

    /// Assigned and funded on-chain.
    pub fn funded(amounts: &[u128]) -> Self {
        Self::funded_in(World::new(), amounts)
    }

    pub fn funded_in(world: World, amounts: &[u128]) -> Self {
        let fx = Self::assigned_in(world, amounts);
        let pending = fx
            .world
            .coordinator()
            .send_fund_job(&fx.client, &fx.job_id)
            .unwrap()
            .value;
        fx.world.mine_and_confirm(&fx.client, &pending.tx_ref);
        fx
    }

    pub fn coordinator(&self) -> Coordinator<'_, &SimulatedEscrow> {
        self.world.coordinator()
    }

    pub fn milestone_id(&self, index: usize) -> String {
        self.world.milestones(&self.job_id)[index].id.clone()
    }

    /// Start and submit milestone `index` through the contract.
    pub fn submit(&self, index: usize) -> String {
        let milestone_id = self.milestone_id(index);
        let coordinator = self.coordinator();
        coordinator.start_milestone(&self.freelancer, &milestone_id).unwrap();
        let pending = coordinator
            .send_submit_milestone(&self.freelancer, &milestone_id, hash(&format!("work {index}")))
            .unwrap()
            .value;
        self.world.mine_and_confirm(&self.freelancer, &pending.tx_ref);
        milestone_id
    }

    /// Approve a submitted milestone through the contract.
    pub fn approve(&self, milestone_id: &str) -> Confirmation {
        let pending = self
            .coordinator()
            .send_approve_milestone(&self.client, milestone_id)
            .unwrap()
            .value;
        self.world.mine_and_confirm(&self.client, &pending.tx_ref)
    }
}
