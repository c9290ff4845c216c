mod common;

use common::{CLIENT, Fixture, OUTSIDER, wallet};
use onwork_core::coordinator::{ExplorerEntry, ExplorerFilter};
use onwork_core::escrow::{EscrowCall, EscrowClient, EscrowTx};
use onwork_core::model::{Amount, JobStatus, Role};
use onwork_core::{Caller, ErrorCode};

#[test]
fn explorer_merges_both_streams_newest_first() {
    let fx = Fixture::funded(&[400, 600]);
    fx.submit(0);
    let coordinator = fx.coordinator();

    let all = coordinator.explorer(None, ExplorerFilter::All).unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.windows(2).all(|pair| pair[0].at_us() >= pair[1].at_us()));

    let jobs = coordinator.explorer(None, ExplorerFilter::Jobs).unwrap();
    assert_eq!(jobs.len(), 1);
    assert!(matches!(&jobs[0], ExplorerEntry::JobCreated { status: JobStatus::Funded, .. }));

    let milestones = coordinator.explorer(None, ExplorerFilter::Milestones).unwrap();
    assert_eq!(milestones.len(), 2);
    let ExplorerEntry::MilestoneUpdated { on_chain_index, job_title, .. } = &milestones[0] else {
        panic!("expected a milestone entry");
    };
    assert_eq!(*on_chain_index, 0);
    assert_eq!(job_title, "Landing page");
}

#[test]
fn explorer_search_matches_titles_and_wallets() {
    let fx = Fixture::assigned(&[1000]);
    let coordinator = fx.coordinator();

    assert_eq!(coordinator.explorer(Some("landing"), ExplorerFilter::All).unwrap().len(), 2);
    let freelancer = wallet(common::FREELANCER).to_string();
    assert_eq!(
        coordinator.explorer(Some(&freelancer), ExplorerFilter::Jobs).unwrap().len(),
        1
    );
    assert!(coordinator.explorer(Some("plumbing"), ExplorerFilter::All).unwrap().is_empty());
    // blank search is no search
    assert_eq!(coordinator.explorer(Some("  "), ExplorerFilter::All).unwrap().len(), 2);
}

#[test]
fn explorer_respects_page_size() {
    let mut world = common::World::new();
    world.config.explorer.page_size = 2;
    let fx = Fixture::created_in(world, &[100, 200, 300]);
    let milestones = fx.coordinator().explorer(None, ExplorerFilter::Milestones).unwrap();
    assert_eq!(milestones.len(), 2);
}

#[test]
fn reconciled_job_is_in_sync() {
    let fx = Fixture::funded(&[400, 600]);
    let id = fx.submit(0);
    fx.approve(&id);
    let report = fx.coordinator().check_drift(&fx.job_id).unwrap();
    assert!(report.in_sync, "{:?}", report.mismatches);
}

#[test]
fn unreconciled_chain_activity_shows_as_drift() {
    let fx = Fixture::assigned(&[1000]);
    let coordinator = fx.coordinator();
    let on_chain_id = coordinator
        .job_detail(&fx.client, &fx.job_id)
        .unwrap()
        .job
        .on_chain_id
        .unwrap();

    // funded from a wallet app; nobody confirmed it here
    fx.world
        .chain
        .submit(&EscrowTx {
            from: wallet(CLIENT),
            value: Amount::new(1000),
            call: EscrowCall::FundJob { job_id: on_chain_id },
        })
        .unwrap();
    fx.world.chain.mine().unwrap();

    let report = coordinator.check_drift(&fx.job_id).unwrap();
    assert!(!report.in_sync);
    assert_eq!(report.on_chain_id, on_chain_id);
    let status = report.mismatches.iter().find(|d| d.field == "status").unwrap();
    assert_eq!(status.stored, "WAITING_FUNDING");
    assert_eq!(status.on_chain, "funded");

    // the direct RPC repairs it
    coordinator
        .update_job_status(&fx.client, &fx.job_id, JobStatus::Funded)
        .unwrap();
    assert!(coordinator.check_drift(&fx.job_id).unwrap().in_sync);
}

#[test]
fn drift_of_unknown_job_is_not_found() {
    let fx = Fixture::created(&[1000]);
    let err = fx.coordinator().check_drift("job-missing").unwrap_err();
    assert_eq!(err.code(), ErrorCode::JobNotFound);
}

#[test]
fn arbiters_see_their_disputes() {
    let fx = Fixture::funded(&[1000]);
    let coordinator = fx.coordinator();
    coordinator.start_milestone(&fx.freelancer, &fx.milestone_id(0)).unwrap();
    assert!(coordinator.arbiter_jobs(&fx.arbiter).unwrap().is_empty());

    let dispute = coordinator
        .send_raise_dispute(&fx.freelancer, &fx.job_id)
        .unwrap()
        .value;
    fx.world.mine_and_confirm(&fx.freelancer, &dispute.tx_ref);

    let jobs = coordinator.arbiter_jobs(&fx.arbiter).unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, fx.job_id);
    assert!(coordinator.arbiter_jobs(&fx.client).unwrap().is_empty());

    let stats = coordinator.dispute_stats().unwrap();
    assert_eq!(stats.disputed, 1);
    assert_eq!(stats.resolved, 0);
}

#[test]
fn my_jobs_covers_both_sides() {
    let fx = Fixture::assigned(&[1000]);
    let coordinator = fx.coordinator();
    assert_eq!(coordinator.my_jobs(&fx.client).unwrap().len(), 1);
    assert_eq!(coordinator.my_jobs(&fx.freelancer).unwrap().len(), 1);
    let outsider = fx.world.register("outsider", Some(OUTSIDER), Role::Freelancer);
    assert!(coordinator.my_jobs(&outsider).unwrap().is_empty());
    assert_eq!(coordinator.all_jobs(&outsider).unwrap().len(), 1);
}

#[test]
fn job_detail_gathers_related_records() {
    let fx = Fixture::assigned(&[300, 700]);
    let detail = fx.coordinator().job_detail(&fx.freelancer, &fx.job_id).unwrap();
    assert_eq!(detail.milestones.len(), 2);
    assert_eq!(detail.applications.len(), 1);
    assert_eq!(detail.owner.id, fx.world.user(&fx.client).id);
    assert!(detail.reviews.is_empty());

    let err = fx
        .coordinator()
        .job_detail(&Caller::Anonymous, &fx.job_id)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthenticated);
}

#[test]
fn profile_reports_ratings_and_counts() {
    let fx = Fixture::funded(&[1000]);
    let id = fx.submit(0);
    fx.approve(&id);
    let coordinator = fx.coordinator();
    coordinator.complete_job(&fx.client, &fx.job_id).unwrap();
    coordinator
        .add_review(&fx.client, &fx.job_id, 4, Some("solid work".into()))
        .unwrap();

    let profile = coordinator.profile(&fx.freelancer).unwrap();
    assert_eq!(profile.jobs_as_freelancer, 1);
    assert_eq!(profile.jobs_as_client, 0);
    assert_eq!(profile.average_rating, Some(4.0));
    assert_eq!(profile.user.total_earned, Amount::new(1000));

    let profile = coordinator.profile(&fx.client).unwrap();
    assert_eq!(profile.jobs_as_client, 1);
    assert_eq!(profile.user.total_spent, Amount::new(1000));
}
