//! Component libraries.
//!
//! [`base`] holds the COD-based wastewater components shared by every train.
//! [`household`] extends it with the tracked placeholders (sulfate and trace
//! pharmaceuticals) and the biogas chemicals, then compiles the result.

use crate::{Component, Components, Degradability, Open};
use std::rc::Rc;

/// Dissolved placeholders tracked without any reaction.
pub const TRACKED_PLACEHOLDERS: [&str; 6] = ["S_SO4", "Diclo", "Meto", "Sulfa", "Benzo", "Iome"];

/// Base wastewater component library (open, so it can be extended).
pub fn base() -> Components<Open> {
    let mut cmps = Components::<Open>::new();
    cmps.append(Component::dissolved("H2O").with_molar_mass(18.015));
    cmps.append(
        Component::dissolved("S_F")
            .with_degradability(Degradability::Readily)
            .with_organic(true)
            .with_cod(1.0)
            .with_nitrogen(0.03352)
            .with_phosphorus(0.005),
    );
    cmps.append(
        Component::dissolved("S_A")
            .with_degradability(Degradability::Readily)
            .with_organic(true)
            .with_cod(1.0),
    );
    cmps.append(
        Component::particulate("X_B_Subst")
            .with_degradability(Degradability::Slowly)
            .with_organic(true)
            .with_cod(1.0)
            .with_nitrogen(0.04)
            .with_phosphorus(0.01)
            .with_mass_ratio(0.75),
    );
    cmps.append(Component::dissolved("S_NH4").with_nitrogen(1.0).with_molar_mass(14.007));
    cmps.append(Component::dissolved("S_NO3").with_nitrogen(1.0).with_molar_mass(14.007));
    cmps.append(Component::dissolved("S_PO4").with_phosphorus(1.0).with_molar_mass(30.974));
    cmps.append(Component::dissolved("S_K").with_molar_mass(39.098));
    cmps
}

/// Appends the dissolved placeholders and the biogas chemicals.
pub fn extend_household(cmps: &mut Components<Open>) {
    for id in TRACKED_PLACEHOLDERS {
        cmps.append(Component::dissolved(id));
    }
    cmps.append(Component::gas("CH4", 16.04).with_organic(true).with_cod(4.0));
    cmps.append(Component::gas("CO2", 44.01));
}

/// Compiled household registry: base library, placeholders, `CH4`, `CO2`.
pub fn household() -> Rc<Components> {
    let mut cmps = base();
    extend_household(&mut cmps);
    cmps.compile()
}

/// Compiled greywater registry: base library and placeholders, no gases.
pub fn greywater() -> Rc<Components> {
    let mut cmps = base();
    for id in TRACKED_PLACEHOLDERS {
        cmps.append(Component::dissolved(id));
    }
    cmps.compile()
}
