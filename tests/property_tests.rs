//! Property-based tests for stress testing core math.
//!
//! These tests verify invariants hold under random inputs.

use leverage_core::*;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// Strategies for generating test data
fn price_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..100_000_000i64).prop_map(|x| Decimal::new(x, 4)) // $0.0001 to $10,000
}

fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..1_000_000i64).prop_map(|x| Decimal::new(x, 2)) // $0.01 to $10,000
}

fn leverage_strategy() -> impl Strategy<Value = Leverage> {
    (1u32..=100u32).prop_map(|l| Leverage::new(l).unwrap())
}

fn side_strategy() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Long), Just(Side::Short)]
}

fn position(side: Side, entry: Decimal, amount: Decimal, leverage: Leverage, margin: Decimal) -> Position {
    let entry_price = Price::new_unchecked(entry);
    Position::open(
        PositionId::new(),
        UserId::new(),
        "BTC/USD",
        side,
        entry_price,
        Quote::new(amount),
        leverage,
        calculate_liquidation_price(entry_price, leverage, side, margin).unwrap(),
        Timestamp::from_millis(0),
    )
}

proptest! {
    /// Long liquidation price sits strictly between zero and entry,
    /// short strictly above entry, for any margin inside (0, 1/leverage).
    #[test]
    fn liquidation_price_bounds(
        entry in price_strategy(),
        leverage in leverage_strategy(),
        margin_share_bps in 1u32..10_000u32,
    ) {
        // margin drawn as a share of the initial margin fraction, so always inside (0, imf)
        let imf = leverage.initial_margin_fraction();
        let margin = imf * Decimal::from(margin_share_bps) / dec!(10000);

        let entry_price = Price::new_unchecked(entry);
        let long = calculate_liquidation_price(entry_price, leverage, Side::Long, margin).unwrap();
        let short = calculate_liquidation_price(entry_price, leverage, Side::Short, margin).unwrap();

        prop_assert!(long.value() > Decimal::ZERO);
        prop_assert!(long < entry_price, "long liq {} not below entry {}", long, entry_price);
        prop_assert!(short > entry_price, "short liq {} not above entry {}", short, entry_price);
    }

    /// Higher leverage never moves the liquidation price away from entry
    #[test]
    fn liquidation_tightens_with_leverage(
        entry in price_strategy(),
        low in 1u32..50u32,
        bump in 1u32..50u32,
    ) {
        let entry_price = Price::new_unchecked(entry);
        let low_lev = Leverage::new(low).unwrap();
        let high_lev = Leverage::new(low + bump).unwrap();
        let margin = dec!(0.001);

        let long_low = calculate_liquidation_price(entry_price, low_lev, Side::Long, margin).unwrap();
        let long_high = calculate_liquidation_price(entry_price, high_lev, Side::Long, margin).unwrap();
        prop_assert!(long_high >= long_low);

        let short_low = calculate_liquidation_price(entry_price, low_lev, Side::Short, margin).unwrap();
        let short_high = calculate_liquidation_price(entry_price, high_lev, Side::Short, margin).unwrap();
        prop_assert!(short_high <= short_low);
    }

    /// PnL is zero when exit = entry
    #[test]
    fn pnl_zero_at_entry(
        side in side_strategy(),
        entry in price_strategy(),
        amount in amount_strategy(),
        leverage in leverage_strategy(),
    ) {
        let entry_price = Price::new_unchecked(entry);
        let pnl = calculate_pnl(side, Quote::new(amount), leverage, entry_price, entry_price).unwrap();
        prop_assert_eq!(pnl.value(), Decimal::ZERO);
    }

    /// PnL sign follows side and direction of the move
    #[test]
    fn pnl_sign(
        side in side_strategy(),
        entry in price_strategy(),
        amount in amount_strategy(),
        leverage in leverage_strategy(),
        delta in -5_000i64..=5_000i64,
    ) {
        let exit = entry + Decimal::new(delta, 4);
        prop_assume!(exit > Decimal::ZERO && delta != 0);

        let pnl = calculate_pnl(
            side,
            Quote::new(amount),
            leverage,
            Price::new_unchecked(entry),
            Price::new_unchecked(exit),
        )
        .unwrap();

        let favourable = (side == Side::Long) == (exit > entry);
        if favourable {
            prop_assert!(pnl.is_positive(), "{:?} should profit moving {} -> {}", side, entry, exit);
        } else {
            prop_assert!(pnl.is_negative(), "{:?} should lose moving {} -> {}", side, entry, exit);
        }
    }

    /// Long and short of the same size have opposite PnL
    #[test]
    fn pnl_antisymmetric(
        entry in price_strategy(),
        exit in price_strategy(),
        amount in amount_strategy(),
        leverage in leverage_strategy(),
    ) {
        let amount = Quote::new(amount);
        let long = calculate_pnl(Side::Long, amount, leverage, Price::new_unchecked(entry), Price::new_unchecked(exit)).unwrap();
        let short = calculate_pnl(Side::Short, amount, leverage, Price::new_unchecked(entry), Price::new_unchecked(exit)).unwrap();
        prop_assert_eq!(long.value(), -short.value());
    }

    /// Liquidation always forfeits exactly the margin, whatever the trigger price
    #[test]
    fn forced_close_forfeits_margin(
        side in side_strategy(),
        entry in price_strategy(),
        exit in price_strategy(),
        amount in amount_strategy(),
        leverage in leverage_strategy(),
    ) {
        let pos = position(side, entry, amount, leverage, dec!(0.001));
        let s = settle(&pos, Price::new_unchecked(exit), CloseReason::Liquidation).unwrap();

        prop_assert_eq!(s.profit, pos.amount.negate());
        prop_assert_eq!(s.credit, Quote::zero());
    }

    /// A manual close realizes the raw formula and settles margin plus profit, whatever the sign
    #[test]
    fn manual_close_settles_raw_pnl(
        side in side_strategy(),
        entry in price_strategy(),
        exit in price_strategy(),
        amount in amount_strategy(),
        leverage in leverage_strategy(),
    ) {
        let pos = position(side, entry, amount, leverage, dec!(0.001));
        let owner = pos.owner_id;
        let exit = Price::new_unchecked(exit);
        let s = settle(&pos, exit, CloseReason::UserClosed { requested_by: owner }).unwrap();

        prop_assert_eq!(Some(s.profit), calculate_pnl(side, pos.amount, leverage, pos.entry_price, exit));
        prop_assert_eq!(s.credit, pos.amount.add(s.profit));
    }

    /// Above the liquidation price a long is never breached, at or below it always is
    #[test]
    fn breach_matches_liquidation_price(
        side in side_strategy(),
        entry in price_strategy(),
        leverage in 2u32..=50u32,
        offset_bps in -500i64..=500i64,
    ) {
        let leverage = Leverage::new(leverage).unwrap();
        let liq = calculate_liquidation_price(Price::new_unchecked(entry), leverage, side, dec!(0.001)).unwrap();
        let quote = liq.value() * (Decimal::ONE + Decimal::new(offset_bps, 4));
        prop_assume!(quote > Decimal::ZERO);

        let breached = is_breached(side, liq, Price::new_unchecked(quote));
        let expected = match side {
            Side::Long => quote <= liq.value(),
            Side::Short => quote >= liq.value(),
        };
        prop_assert_eq!(breached, expected);
    }
}
