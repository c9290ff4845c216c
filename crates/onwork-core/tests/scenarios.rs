mod common;

use common::{ARBITER, CLIENT, FREELANCER, Fixture, OUTSIDER, World, draft, hash, wallet};
use onwork_core::ErrorCode;
use onwork_core::coordinator::{Confirmation, NewJob};
use onwork_core::escrow::{EscrowCall, EscrowClient, EscrowTx};
use onwork_core::model::{
    Amount, ApplicationStatus, JobDraft, JobStatus, MilestoneSpec, MilestoneStatus, Role,
};

fn specs(amounts: &[u128]) -> Vec<MilestoneSpec> {
    draft(amounts, amounts.iter().sum()).milestones
}

/// Create a job directly on the simulated contract, as a browser wallet
/// would, and return its on-chain id.
fn create_on_chain(world: &World, amounts: &[u128], total: u128) -> u64 {
    let d = draft(amounts, total);
    world
        .chain
        .submit(&EscrowTx {
            from: wallet(CLIENT),
            value: Amount::ZERO,
            call: EscrowCall::CreateJob {
                token_address: None,
                total_amount: d.total_amount,
                arbiter: d.arbiter,
                job_hash: d.job_hash,
                milestone_amounts: d.milestones.iter().map(|m| m.amount).collect(),
                milestone_hashes: d.milestones.iter().map(|m| m.description_hash.clone()).collect(),
            },
        })
        .unwrap();
    world.chain.mine().unwrap();
    world.chain.jobs().unwrap().last().unwrap().id
}

fn new_job(on_chain_id: u64, total: u128) -> NewJob {
    let d = draft(&[total], total);
    NewJob {
        title: d.title,
        description: d.description,
        job_hash: d.job_hash,
        on_chain_id,
        client_wallet: d.client_wallet,
        arbiter: d.arbiter,
        token_address: None,
        total_amount: Amount::new(total),
        category: d.category,
    }
}

// ---------------------------------------------------------------------------
// Milestone amounts must sum to the total
// ---------------------------------------------------------------------------

#[test]
fn matching_milestones_create_the_job() {
    let fx = Fixture::created(&[600, 400]);
    let detail = fx.coordinator().job_detail(&fx.client, &fx.job_id).unwrap();
    assert_eq!(detail.job.total_amount, Amount::new(1000));
    assert_eq!(detail.job.status, JobStatus::Created);
    let amounts: Vec<_> = detail.milestones.iter().map(|m| m.amount.units()).collect();
    assert_eq!(amounts, vec![600, 400]);
    let indices: Vec<_> = detail.milestones.iter().map(|m| m.on_chain_index).collect();
    assert_eq!(indices, vec![0, 1]);
}

#[test]
fn mismatched_milestones_persist_nothing() {
    let world = World::new();
    let client = world.register("client", Some(CLIENT), Role::Client);
    let coordinator = world.coordinator();

    let err = coordinator
        .send_create_job(&client, draft(&[600, 300], 1000))
        .unwrap_err();
    assert!(err.is_validation());
    assert_eq!(err.code(), ErrorCode::AmountMismatch);

    assert!(coordinator.all_jobs(&client).unwrap().is_empty());
    assert!(coordinator.pending_transactions(&client, None).unwrap().is_empty());
    assert_eq!(world.chain.pending_count().unwrap(), 0);
}

#[test]
fn direct_creation_with_bad_sum_persists_nothing() {
    let world = World::new();
    let client = world.register("client", Some(CLIENT), Role::Client);
    let on_chain_id = create_on_chain(&world, &[600, 400], 1000);
    let coordinator = world.coordinator();

    let err = coordinator
        .create_job_with_milestones(&client, &draft(&[600, 300], 1000), on_chain_id)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::AmountMismatch);
    assert!(coordinator.all_jobs(&client).unwrap().is_empty());

    let created = coordinator
        .create_job_with_milestones(&client, &draft(&[600, 400], 1000), on_chain_id)
        .unwrap();
    assert_eq!(created.value.milestones.len(), 2);
    assert_eq!(created.changes.len(), 3);
}

#[test]
fn direct_creation_must_match_the_contract() {
    let world = World::new();
    let client = world.register("client", Some(CLIENT), Role::Client);
    let on_chain_id = create_on_chain(&world, &[1000], 1000);
    let coordinator = world.coordinator();

    let err = coordinator.create_job(&client, new_job(on_chain_id, 999)).unwrap_err();
    assert!(err.is_validation());

    let err = coordinator.create_job(&client, new_job(on_chain_id + 7, 1000)).unwrap_err();
    assert!(err.is_precondition());

    let job = coordinator.create_job(&client, new_job(on_chain_id, 1000)).unwrap().value;
    assert_eq!(job.on_chain_id, Some(on_chain_id));

    let err = coordinator.create_job(&client, new_job(on_chain_id, 1000)).unwrap_err();
    assert!(err.is_precondition(), "on-chain id recorded twice: {err}");
}

#[test]
fn create_milestones_is_replay_safe() {
    let world = World::new();
    let client = world.register("client", Some(CLIENT), Role::Client);
    let on_chain_id = create_on_chain(&world, &[600, 400], 1000);
    let coordinator = world.coordinator();
    let job = coordinator.create_job(&client, new_job(on_chain_id, 1000)).unwrap().value;

    let err = coordinator
        .create_milestones(&client, &job.id, &specs(&[600, 300]))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::AmountMismatch);
    assert!(world.milestones(&job.id).is_empty());

    let first = coordinator
        .create_milestones(&client, &job.id, &specs(&[600, 400]))
        .unwrap();
    assert_eq!((first.value.created, first.value.skipped), (2, 0));

    let replay = coordinator
        .create_milestones(&client, &job.id, &specs(&[600, 400]))
        .unwrap();
    assert_eq!((replay.value.created, replay.value.skipped), (0, 2));
    assert!(replay.changes.is_empty());
    assert_eq!(world.milestones(&job.id).len(), 2);

    let err = coordinator
        .create_milestones(&client, &job.id, &specs(&[500, 500]))
        .unwrap_err();
    assert!(err.is_validation(), "different terms at a stored index: {err}");
}

#[test]
fn only_the_client_adds_milestones() {
    let world = World::new();
    let client = world.register("client", Some(CLIENT), Role::Client);
    let outsider = world.register("outsider", Some(OUTSIDER), Role::Client);
    let on_chain_id = create_on_chain(&world, &[1000], 1000);
    let coordinator = world.coordinator();
    let job = coordinator.create_job(&client, new_job(on_chain_id, 1000)).unwrap().value;

    let err = coordinator
        .create_milestones(&outsider, &job.id, &specs(&[1000]))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Forbidden);
}

// ---------------------------------------------------------------------------
// Assignment needs an accepted application
// ---------------------------------------------------------------------------

#[test]
fn assign_without_accepted_application_is_rejected() {
    let fx = Fixture::created(&[1000]);
    let coordinator = fx.coordinator();
    let application = coordinator
        .create_job_application(&fx.freelancer, &fx.job_id, "hire me", &wallet(FREELANCER))
        .unwrap()
        .value;

    let err = coordinator
        .send_assign_freelancer(&fx.client, &fx.job_id, &application.id)
        .unwrap_err();
    assert!(err.is_precondition());
    assert_eq!(err.code(), ErrorCode::GuardFailed);

    let err = coordinator
        .assign_freelancer_wallet_to_job(&fx.client, &fx.job_id, &application.id, &wallet(FREELANCER))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::GuardFailed);

    let detail = coordinator.job_detail(&fx.client, &fx.job_id).unwrap();
    assert_eq!(detail.job.freelancer_wallet, None);
    assert_eq!(detail.job.status, JobStatus::Created);
}

#[test]
fn assignment_moves_job_to_waiting_funding() {
    let fx = Fixture::assigned(&[1000]);
    let detail = fx.coordinator().job_detail(&fx.client, &fx.job_id).unwrap();
    assert_eq!(detail.job.status, JobStatus::WaitingFunding);
    assert_eq!(detail.job.freelancer_wallet, Some(wallet(FREELANCER)));
    assert_eq!(detail.applications[0].status, ApplicationStatus::Accepted);
}

#[test]
fn at_most_one_application_is_accepted() {
    let fx = Fixture::created(&[1000]);
    let other = fx.world.register("other", Some(OUTSIDER), Role::Freelancer);
    let coordinator = fx.coordinator();
    let first = coordinator
        .create_job_application(&fx.freelancer, &fx.job_id, "me", &wallet(FREELANCER))
        .unwrap()
        .value;
    let second = coordinator
        .create_job_application(&other, &fx.job_id, "no, me", &wallet(OUTSIDER))
        .unwrap()
        .value;

    coordinator.accept_application(&fx.client, &first.id).unwrap();
    let err = coordinator.accept_application(&fx.client, &second.id).unwrap_err();
    assert!(err.is_precondition());

    let accepted: Vec<_> = coordinator
        .job_detail(&fx.client, &fx.job_id)
        .unwrap()
        .applications
        .into_iter()
        .filter(|a| a.status == ApplicationStatus::Accepted)
        .collect();
    assert_eq!(accepted.len(), 1);
}

#[test]
fn applications_reject_duplicates_and_the_client() {
    let fx = Fixture::created(&[1000]);
    let coordinator = fx.coordinator();
    coordinator
        .create_job_application(&fx.freelancer, &fx.job_id, "me", &wallet(FREELANCER))
        .unwrap();

    let err = coordinator
        .create_job_application(&fx.freelancer, &fx.job_id, "me again", &wallet(FREELANCER))
        .unwrap_err();
    assert!(err.is_precondition());

    let err = coordinator
        .create_job_application(&fx.client, &fx.job_id, "my own job", &wallet(CLIENT))
        .unwrap_err();
    assert!(err.is_precondition());

    let err = coordinator
        .create_job_application(&fx.freelancer, &fx.job_id, "borrowed", &wallet(ARBITER))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Forbidden);
}

// ---------------------------------------------------------------------------
// Approving a PENDING milestone
// ---------------------------------------------------------------------------

#[test]
fn approving_pending_milestone_changes_nothing() {
    let fx = Fixture::funded(&[500, 500]);
    let milestone_id = fx.milestone_id(0);
    let coordinator = fx.coordinator();

    let err = coordinator
        .send_approve_milestone(&fx.client, &milestone_id)
        .unwrap_err();
    assert!(err.is_precondition());

    let err = coordinator
        .update_milestone(&fx.client, &milestone_id, MilestoneStatus::Completed, None)
        .unwrap_err();
    assert!(err.is_precondition());

    assert_eq!(fx.world.milestones(&fx.job_id)[0].status, MilestoneStatus::Pending);
    assert_eq!(fx.world.user(&fx.client).total_spent, Amount::ZERO);
    assert_eq!(fx.world.user(&fx.freelancer).total_earned, Amount::ZERO);
}

// ---------------------------------------------------------------------------
// Approval credits both sides
// ---------------------------------------------------------------------------

#[test]
fn approval_updates_aggregates() {
    let fx = Fixture::funded(&[250, 750]);
    let milestone_id = fx.submit(0);
    let before = fx.world.user(&fx.client).total_spent;

    let outcome = fx.approve(&milestone_id);
    assert!(matches!(outcome, Confirmation::Applied { .. }));

    assert_eq!(fx.world.user(&fx.freelancer).total_earned, Amount::new(250));
    assert_eq!(
        fx.world.user(&fx.client).total_spent,
        before.checked_add(Amount::new(250)).unwrap()
    );
    assert_eq!(fx.world.milestones(&fx.job_id)[0].status, MilestoneStatus::Completed);
}

// ---------------------------------------------------------------------------
// A second approval is rejected
// ---------------------------------------------------------------------------

#[test]
fn second_approval_is_rejected() {
    let fx = Fixture::funded(&[250, 750]);
    let milestone_id = fx.submit(0);
    fx.approve(&milestone_id);
    let coordinator = fx.coordinator();

    let err = coordinator
        .send_approve_milestone(&fx.client, &milestone_id)
        .unwrap_err();
    assert!(err.is_precondition());
    let err = coordinator
        .update_milestone(&fx.client, &milestone_id, MilestoneStatus::Completed, None)
        .unwrap_err();
    assert!(err.is_precondition());

    assert_eq!(fx.world.user(&fx.freelancer).total_earned, Amount::new(250));
    assert_eq!(fx.world.user(&fx.client).total_spent, Amount::new(250));
}

// ---------------------------------------------------------------------------
// Dispute before any milestone started
// ---------------------------------------------------------------------------

#[test]
fn dispute_needs_a_started_milestone() {
    let fx = Fixture::funded(&[500, 500]);
    let coordinator = fx.coordinator();

    let err = coordinator.send_raise_dispute(&fx.client, &fx.job_id).unwrap_err();
    assert!(err.is_precondition());
    let err = coordinator
        .update_job_status(&fx.freelancer, &fx.job_id, JobStatus::Disputed)
        .unwrap_err();
    assert!(err.is_precondition());

    let job = coordinator.job_detail(&fx.client, &fx.job_id).unwrap().job;
    assert_eq!(job.status, JobStatus::Funded);
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[test]
fn full_lifecycle_completes_and_takes_a_review() {
    let fx = Fixture::funded(&[400, 600]);
    for index in 0..2 {
        let milestone_id = fx.submit(index);
        fx.approve(&milestone_id);
    }
    let coordinator = fx.coordinator();

    let err = coordinator.complete_job(&fx.freelancer, &fx.job_id).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Forbidden);
    let job = coordinator.complete_job(&fx.client, &fx.job_id).unwrap().value;
    assert_eq!(job.status, JobStatus::Completed);

    let review = coordinator
        .add_review(&fx.client, &fx.job_id, 5, Some("great work".into()))
        .unwrap()
        .value;
    assert_eq!(review.rating, 5);
    let err = coordinator.add_review(&fx.client, &fx.job_id, 4, None).unwrap_err();
    assert!(err.is_precondition());

    let profile = coordinator.profile(&fx.freelancer).unwrap();
    assert_eq!(profile.user.total_earned, Amount::new(1000));
    assert_eq!(profile.jobs_as_freelancer, 1);
    assert_eq!(profile.average_rating, Some(5.0));

    assert!(coordinator.check_drift(&fx.job_id).unwrap().in_sync);
}

#[test]
fn complete_requires_every_milestone_completed() {
    let fx = Fixture::funded(&[400, 600]);
    let milestone_id = fx.submit(0);
    fx.approve(&milestone_id);

    let err = fx.coordinator().complete_job(&fx.client, &fx.job_id).unwrap_err();
    assert!(err.is_precondition());
}

#[test]
fn milestones_cannot_skip_submission() {
    let fx = Fixture::funded(&[1000]);
    let milestone_id = fx.milestone_id(0);
    let coordinator = fx.coordinator();
    coordinator.start_milestone(&fx.freelancer, &milestone_id).unwrap();

    let err = coordinator
        .update_milestone(&fx.client, &milestone_id, MilestoneStatus::Completed, None)
        .unwrap_err();
    assert!(err.is_precondition());
    let err = coordinator
        .update_milestone(&fx.client, &milestone_id, MilestoneStatus::Pending, None)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidStateTransition);
}

#[test]
fn starting_work_moves_job_in_progress() {
    let fx = Fixture::funded(&[400, 600]);
    let job = fx
        .coordinator()
        .update_job_status(&fx.client, &fx.job_id, JobStatus::InProgress)
        .unwrap();
    assert_eq!(job.value.status, JobStatus::InProgress);
    let milestones = fx.world.milestones(&fx.job_id);
    assert_eq!(milestones[0].status, MilestoneStatus::InProgress);
    assert_eq!(milestones[1].status, MilestoneStatus::Pending);
}

#[test]
fn no_submission_while_disputed() {
    let fx = Fixture::funded(&[500, 500]);
    let first = fx.milestone_id(0);
    let coordinator = fx.coordinator();
    coordinator.start_milestone(&fx.freelancer, &first).unwrap();
    let pending = coordinator
        .send_raise_dispute(&fx.freelancer, &fx.job_id)
        .unwrap()
        .value;
    fx.world.mine_and_confirm(&fx.freelancer, &pending.tx_ref);

    let err = coordinator
        .send_submit_milestone(&fx.freelancer, &first, hash("late work"))
        .unwrap_err();
    assert!(err.is_precondition());
    let err = coordinator
        .start_milestone(&fx.freelancer, &fx.milestone_id(1))
        .unwrap_err();
    assert!(err.is_precondition());

    let queue = coordinator.arbiter_jobs(&fx.arbiter).unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].status, JobStatus::Disputed);
    assert_eq!(coordinator.dispute_stats().unwrap().disputed, 1);
}

#[test]
fn funding_is_client_only_and_needs_milestones() {
    let fx = Fixture::assigned(&[1000]);
    let err = fx
        .coordinator()
        .send_fund_job(&fx.freelancer, &fx.job_id)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Forbidden);
}

#[test]
fn direct_status_updates_follow_the_contract() {
    let fx = Fixture::assigned(&[1000]);
    let coordinator = fx.coordinator();

    // nothing deposited on-chain yet
    let err = coordinator
        .update_job_status(&fx.client, &fx.job_id, JobStatus::Funded)
        .unwrap_err();
    assert!(err.is_precondition());

    let err = coordinator
        .update_job_status(&fx.client, &fx.job_id, JobStatus::Resolved)
        .unwrap_err();
    assert!(err.is_validation());

    let err = coordinator
        .update_job_status(&fx.client, &fx.job_id, JobStatus::Created)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidStateTransition);

    let cancelled = coordinator
        .cancel_job(&fx.client, &fx.job_id)
        .unwrap()
        .value;
    assert_eq!(cancelled.status, JobStatus::Cancelled);
}

#[test]
fn funded_jobs_cannot_be_deleted() {
    let fx = Fixture::funded(&[1000]);
    let err = fx.coordinator().delete_job(&fx.client, &fx.job_id).unwrap_err();
    assert!(err.is_precondition());
}

#[test]
fn deleting_an_unfunded_job_cascades() {
    let fx = Fixture::created(&[600, 400]);
    let coordinator = fx.coordinator();
    coordinator
        .create_job_application(&fx.freelancer, &fx.job_id, "me", &wallet(FREELANCER))
        .unwrap();

    let err = coordinator.delete_job(&fx.freelancer, &fx.job_id).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Forbidden);

    let deleted = coordinator.delete_job(&fx.client, &fx.job_id).unwrap();
    assert_eq!(deleted.changes.len(), 4);
    let err = coordinator.job_detail(&fx.client, &fx.job_id).unwrap_err();
    assert!(err.is_not_found());
    assert!(coordinator.milestones_by_job(&fx.job_id).unwrap_err().is_not_found());
}

#[test]
fn replacing_milestones_resets_the_total() {
    let world = World::new();
    let client = world.register("client", Some(CLIENT), Role::Client);
    let coordinator = world.coordinator();
    let on_chain_id = create_on_chain(&world, &[300, 300, 400], 1000);
    let job = coordinator.create_job(&client, new_job(on_chain_id, 1000)).unwrap().value;

    // recorded wrongly, then repaired to match the contract
    coordinator
        .create_milestones(&client, &job.id, &specs(&[1000]))
        .unwrap_err();
    let replaced = coordinator
        .replace_milestones(&client, &job.id, &specs(&[300, 300, 400]))
        .unwrap()
        .value;
    assert_eq!(replaced.created, 3);
    let header = coordinator.milestones_by_job(&job.id).unwrap();
    assert_eq!(header.job.total_amount, Amount::new(1000));
    assert_eq!(header.milestones.len(), 3);

    let err = coordinator
        .replace_milestones(&client, &job.id, &specs(&[500, 500]))
        .unwrap_err();
    assert!(err.is_validation(), "must agree with the contract: {err}");
}

#[test]
fn job_reads_require_authentication() {
    let fx = Fixture::created(&[1000]);
    let coordinator = fx.coordinator();
    let anonymous = onwork_core::Caller::Anonymous;

    assert_eq!(
        coordinator.job_detail(&anonymous, &fx.job_id).unwrap_err().code(),
        ErrorCode::Unauthenticated
    );
    assert!(coordinator.all_jobs(&anonymous).is_err());
    assert!(coordinator.dispute_stats().is_ok());
    assert_eq!(coordinator.milestones_by_job(&fx.job_id).unwrap().milestones.len(), 1);
    assert_eq!(coordinator.my_jobs(&fx.client).unwrap().len(), 1);
    assert!(coordinator.my_jobs(&fx.arbiter).unwrap().is_empty());
}

#[test]
fn draft_commit_is_stable() {
    assert_eq!(
        JobDraft::commit("Landing page", "Design and build a landing page"),
        draft(&[1], 1).job_hash
    );
}
