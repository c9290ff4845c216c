mod common;

use common::{ARBITER, CLIENT, FREELANCER, Fixture, World, wallet};
use onwork_core::config::{ProjectConfig, ReconcileConfig};
use onwork_core::coordinator::Confirmation;
use onwork_core::model::{Amount, JobStatus, MilestoneStatus, Role};
use onwork_core::{Caller, ErrorCode};

fn claiming() -> World {
    World::with_config(ProjectConfig {
        reconcile: ReconcileConfig {
            credit_unlinked_earnings: true,
        },
        ..ProjectConfig::default()
    })
}

/// A funded job whose freelancer applied with a wallet they never linked.
fn unlinked_job(world: World, amounts: &[u128]) -> (World, Caller, Caller, String) {
    let client = world.register("client", Some(CLIENT), Role::Client);
    let freelancer = world.register("drifter", None, Role::Freelancer);
    world.register("arbiter", Some(ARBITER), Role::Client);
    let coordinator = world.coordinator();

    let total = amounts.iter().sum();
    let created = coordinator
        .send_create_job(&client, common::draft(amounts, total))
        .unwrap()
        .value;
    let Confirmation::Applied { job_id, .. } = world.mine_and_confirm(&client, &created.tx_ref) else {
        panic!("job not created");
    };

    let application = coordinator
        .create_job_application(&freelancer, &job_id, "no wallet linked yet", &wallet(FREELANCER))
        .unwrap()
        .value;
    coordinator.accept_application(&client, &application.id).unwrap();
    let assign = coordinator
        .send_assign_freelancer(&client, &job_id, &application.id)
        .unwrap()
        .value;
    world.mine_and_confirm(&client, &assign.tx_ref);
    let fund = coordinator.send_fund_job(&client, &job_id).unwrap().value;
    world.mine_and_confirm(&client, &fund.tx_ref);
    (world, client, freelancer, job_id)
}

fn deliver(world: &World, client: &Caller, freelancer: &Caller, job_id: &str, index: usize) {
    let milestone_id = world.milestones(job_id)[index].id.clone();
    let coordinator = world.coordinator();
    coordinator.start_milestone(freelancer, &milestone_id).unwrap();
    let submit = coordinator
        .send_submit_milestone(freelancer, &milestone_id, common::hash("delivered"))
        .unwrap()
        .value;
    world.mine_and_confirm(freelancer, &submit.tx_ref);
    let approve = coordinator
        .send_approve_milestone(client, &milestone_id)
        .unwrap()
        .value;
    world.mine_and_confirm(client, &approve.tx_ref);
}

#[test]
fn unlinked_earnings_are_claimed_on_link() {
    let (world, client, freelancer, job_id) = unlinked_job(claiming(), &[300, 700]);
    deliver(&world, &client, &freelancer, &job_id, 0);

    assert_eq!(world.user(&client).total_spent, Amount::new(300));
    assert_eq!(world.user(&freelancer).total_earned, Amount::ZERO);
    assert_eq!(world.milestones(&job_id)[0].status, MilestoneStatus::Completed);

    let linked = world
        .coordinator()
        .link_wallet(&freelancer, &wallet(FREELANCER))
        .unwrap();
    assert_eq!(linked.value.total_earned, Amount::new(300));
    assert_eq!(linked.value.wallet_address, Some(wallet(FREELANCER)));

    let profile = world.coordinator().profile(&freelancer).unwrap();
    assert_eq!(profile.unclaimed, Amount::ZERO);
    assert_eq!(profile.jobs_as_freelancer, 1);

    // linked now, so the next approval credits directly
    deliver(&world, &client, &freelancer, &job_id, 1);
    assert_eq!(world.user(&freelancer).total_earned, Amount::new(1000));
}

#[test]
fn unlinked_earnings_stay_unclaimed_by_default() {
    let (world, client, freelancer, job_id) = unlinked_job(World::new(), &[1000]);
    deliver(&world, &client, &freelancer, &job_id, 0);

    let linked = world
        .coordinator()
        .apply_as_freelancer(&freelancer, Some(&wallet(FREELANCER)))
        .unwrap()
        .value;
    assert_eq!(linked.total_earned, Amount::ZERO);

    let profile = world.coordinator().profile(&freelancer).unwrap();
    assert_eq!(profile.unclaimed, Amount::new(1000));
}

#[test]
fn registering_with_the_wallet_claims_too() {
    let (world, client, drifter, job_id) = unlinked_job(claiming(), &[500]);
    deliver(&world, &client, &drifter, &job_id, 0);

    // the applicant never linked; whoever registers with the wallet claims
    let heir = world
        .coordinator()
        .register("heir", "heir@example.com", Some(wallet(FREELANCER)), Role::Freelancer)
        .unwrap()
        .value;
    assert_eq!(heir.total_earned, Amount::new(500));
}

#[test]
fn linking_someone_elses_wallet_is_rejected() {
    let fx = Fixture::created(&[1000]);
    let stranger = fx.world.register("stranger", None, Role::Freelancer);
    let err = fx
        .coordinator()
        .link_wallet(&stranger, &wallet(FREELANCER))
        .unwrap_err();
    assert!(err.is_validation());

    let err = fx
        .coordinator()
        .link_wallet(&fx.client, &wallet(7))
        .unwrap_err();
    assert!(err.is_precondition());

    // relinking the same wallet changes nothing
    let same = fx.coordinator().link_wallet(&fx.client, &wallet(CLIENT)).unwrap();
    assert!(same.changes.is_empty());
}

/// A [400, 600] job with the first milestone approved and the second
/// disputed while in progress.
fn disputed() -> Fixture {
    let fx = Fixture::funded(&[400, 600]);
    let first = fx.submit(0);
    fx.approve(&first);
    let coordinator = fx.coordinator();
    coordinator.start_milestone(&fx.freelancer, &fx.milestone_id(1)).unwrap();
    let dispute = coordinator.send_raise_dispute(&fx.client, &fx.job_id).unwrap().value;
    fx.world.mine_and_confirm(&fx.client, &dispute.tx_ref);
    fx
}

#[test]
fn resolution_credits_only_the_unreleased_payment() {
    let fx = disputed();
    let coordinator = fx.coordinator();
    assert_eq!(
        coordinator.job_detail(&fx.client, &fx.job_id).unwrap().job.status,
        JobStatus::Disputed
    );
    let resolve = coordinator
        .send_resolve_dispute(&fx.arbiter, &fx.job_id, Amount::new(300), Amount::new(700))
        .unwrap()
        .value;
    let outcome = fx.world.mine_and_confirm(&fx.arbiter, &resolve.tx_ref);
    assert!(matches!(outcome, Confirmation::Applied { .. }));

    assert_eq!(fx.world.user(&fx.freelancer).total_earned, Amount::new(700));
    assert_eq!(fx.world.user(&fx.client).total_spent, Amount::new(700));
    let job = coordinator.job_detail(&fx.client, &fx.job_id).unwrap().job;
    assert_eq!(job.status, JobStatus::Resolved);
}

#[test]
fn resolution_split_must_cover_the_total() {
    let fx = disputed();
    let err = fx
        .coordinator()
        .send_resolve_dispute(&fx.arbiter, &fx.job_id, Amount::new(300), Amount::new(600))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::AmountMismatch);
    assert_eq!(fx.world.chain.pending_count().unwrap(), 0);
}

#[test]
fn resolution_cannot_claw_back_released_funds() {
    let fx = disputed();
    let err = fx
        .coordinator()
        .send_resolve_dispute(&fx.arbiter, &fx.job_id, Amount::new(700), Amount::new(300))
        .unwrap_err();
    assert!(err.is_validation());
}

#[test]
fn only_the_arbiter_resolves() {
    let fx = disputed();
    let err = fx
        .coordinator()
        .send_resolve_dispute(&fx.client, &fx.job_id, Amount::new(300), Amount::new(700))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Forbidden);
}

#[test]
fn direct_resolution_waits_for_the_contract() {
    let fx = disputed();
    let coordinator = fx.coordinator();
    coordinator
        .send_resolve_dispute(&fx.arbiter, &fx.job_id, Amount::new(300), Amount::new(700))
        .unwrap();

    // sent but not mined
    let err = coordinator
        .resolve_dispute(&fx.arbiter, &fx.job_id, Amount::new(300), Amount::new(700))
        .unwrap_err();
    assert!(err.is_precondition());
    assert_eq!(fx.world.user(&fx.freelancer).total_earned, Amount::new(400));

    fx.world.chain.mine().unwrap();
    let resolved = coordinator
        .resolve_dispute(&fx.arbiter, &fx.job_id, Amount::new(300), Amount::new(700))
        .unwrap()
        .value;
    assert_eq!(resolved.status, JobStatus::Resolved);
    assert_eq!(fx.world.user(&fx.freelancer).total_earned, Amount::new(700));
}
